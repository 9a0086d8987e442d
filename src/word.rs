use std::cmp::Ordering;
use std::fmt;

/// Number of distinct values a MIX byte can hold.
pub const BYTE_SIZE: i64 = 64;
/// `64^5`, one more than the largest magnitude of a word.
pub const WORD_RANGE: i64 = BYTE_SIZE.pow(5);
/// Largest magnitude that fits in five bytes.
pub const WORD_MAX: i64 = WORD_RANGE - 1;
/// Largest magnitude that fits in the two address bytes of an instruction.
pub const ADDRESS_MAX: i64 = BYTE_SIZE * BYTE_SIZE - 1;

/// Every register and memory cell carries a sign, including zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
pub enum Sign {
    #[default]
    Plus,
    Minus,
}

impl Sign {
    /// Sign of an integer, treating zero as positive.
    pub fn of(value: i64) -> Sign {
        if value < 0 {
            Sign::Minus
        } else {
            Sign::Plus
        }
    }

    pub fn flip(self) -> Sign {
        match self {
            Sign::Plus => Sign::Minus,
            Sign::Minus => Sign::Plus,
        }
    }

    /// Multiply a magnitude by this sign.
    pub fn apply(self, magnitude: i64) -> i64 {
        match self {
            Sign::Plus => magnitude,
            Sign::Minus => -magnitude,
        }
    }

    pub fn is_negative(self) -> bool {
        self == Sign::Minus
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sign::Plus => f.write_str("+"),
            Sign::Minus => f.write_str("-"),
        }
    }
}

/// Failure to represent a value as a word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WordError {
    /// Magnitude exceeds `64^5 - 1`.
    OutOfRange(i64),
    /// A byte outside `0..=63`.
    ByteOutOfRange(u8),
}

impl std::error::Error for WordError {}

impl fmt::Display for WordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange(value) => {
                write!(f, "value {value} does not fit in a five-byte word")
            }
            Self::ByteOutOfRange(byte) => write!(f, "byte {byte} is outside of 0..=63"),
        }
    }
}

/// A MIX word: a sign and five 6-bit bytes.
///
/// `+0` and `-0` are distinct values of this type (they compare unequal with `==`), but
/// [`Word::compare`] treats them as numerically equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Word {
    sign: Sign,
    /// Always `< WORD_RANGE`.
    magnitude: u32,
}

impl Word {
    pub const ZERO: Word = Word {
        sign: Sign::Plus,
        magnitude: 0,
    };

    /// Construct from a signed integer. Zero is always `+0`.
    pub fn new(value: i64) -> Result<Word, WordError> {
        Word::from_parts(Sign::of(value), value.abs()).map_err(|_| WordError::OutOfRange(value))
    }

    /// Construct from an explicit sign and a nonnegative magnitude, allowing `-0`.
    pub fn from_parts(sign: Sign, magnitude: i64) -> Result<Word, WordError> {
        if !(0..=WORD_MAX).contains(&magnitude) {
            return Err(WordError::OutOfRange(sign.apply(magnitude)));
        }
        Ok(Word {
            sign,
            magnitude: magnitude as u32,
        })
    }

    /// Keep the low five bytes of `magnitude`, reporting whether anything was lost.
    pub fn wrapping(sign: Sign, magnitude: i64) -> (Word, bool) {
        let magnitude = magnitude.abs();
        let word = Word {
            sign,
            magnitude: (magnitude % WORD_RANGE) as u32,
        };
        (word, magnitude > WORD_MAX)
    }

    pub fn from_bytes(sign: Sign, bytes: [u8; 5]) -> Result<Word, WordError> {
        let mut magnitude = 0u32;
        for byte in bytes {
            if byte as i64 >= BYTE_SIZE {
                return Err(WordError::ByteOutOfRange(byte));
            }
            magnitude = magnitude * BYTE_SIZE as u32 + byte as u32;
        }
        Ok(Word { sign, magnitude })
    }

    /// Assemble an instruction word `(±AA, I, F, C)`.
    pub fn instruction(address: i64, index: u8, field: u8, opcode: u8) -> Result<Word, WordError> {
        if address.abs() > ADDRESS_MAX {
            return Err(WordError::OutOfRange(address));
        }
        let magnitude = address.abs();
        let high = (magnitude / BYTE_SIZE) as u8;
        let low = (magnitude % BYTE_SIZE) as u8;
        Word::from_bytes(Sign::of(address), [high, low, index, field, opcode])
    }

    pub fn sign(&self) -> Sign {
        self.sign
    }

    pub fn magnitude(&self) -> i64 {
        self.magnitude as i64
    }

    /// Signed integer value; `-0` reads as `0`.
    pub fn value(&self) -> i64 {
        self.sign.apply(self.magnitude())
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude == 0
    }

    pub fn with_sign(self, sign: Sign) -> Word {
        Word { sign, ..self }
    }

    pub fn negated(self) -> Word {
        self.with_sign(self.sign.flip())
    }

    /// Bytes 1 to 5, most significant first.
    pub fn bytes(&self) -> [u8; 5] {
        let mut bytes = [0; 5];
        let mut rest = self.magnitude;
        for byte in bytes.iter_mut().rev() {
            *byte = (rest % BYTE_SIZE as u32) as u8;
            rest /= BYTE_SIZE as u32;
        }
        bytes
    }

    /// Signed address part, bytes `(0:2)`.
    pub fn address(&self) -> i64 {
        let [high, low, ..] = self.bytes();
        self.sign.apply(high as i64 * BYTE_SIZE + low as i64)
    }

    pub fn index(&self) -> u8 {
        self.bytes()[2]
    }

    pub fn modifier(&self) -> u8 {
        self.bytes()[3]
    }

    pub fn opcode(&self) -> u8 {
        self.bytes()[4]
    }

    /// Contents of the field `spec`, shifted to the right. The sign is only carried over
    /// when the field includes it.
    pub fn field(&self, spec: FieldSpec) -> Word {
        let bytes = self.bytes();
        let magnitude = bytes[spec.first_byte() - 1..spec.right() as usize]
            .iter()
            .fold(0u32, |acc, &b| acc * BYTE_SIZE as u32 + b as u32);
        let sign = if spec.includes_sign() {
            self.sign
        } else {
            Sign::Plus
        };
        Word { sign, magnitude }
    }

    /// Overwrite the field `spec` with the rightmost bytes of `src`, leaving every byte
    /// outside of the field untouched.
    pub fn set_field(&mut self, spec: FieldSpec, src: Word) {
        if spec.includes_sign() {
            self.sign = src.sign;
        }
        let width = spec.width();
        if width == 0 {
            return;
        }
        let src_bytes = src.bytes();
        let mut bytes = self.bytes();
        let start = spec.first_byte() - 1;
        bytes[start..start + width].copy_from_slice(&src_bytes[5 - width..]);
        self.magnitude = bytes
            .iter()
            .fold(0u32, |acc, &b| acc * BYTE_SIZE as u32 + b as u32);
    }

    /// Numeric comparison, identifying `+0` with `-0`.
    pub fn compare(&self, other: &Word) -> Ordering {
        self.value().cmp(&other.value())
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sign)?;
        for byte in self.bytes() {
            write!(f, " {byte:02}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word({self})")
    }
}

/// A field specification `(L:R)`, selecting bytes `L..=R` where byte 0 is the sign.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FieldSpec {
    left: u8,
    right: u8,
}

impl FieldSpec {
    pub const FULL: FieldSpec = FieldSpec { left: 0, right: 5 };

    pub fn new(left: u8, right: u8) -> Option<FieldSpec> {
        (left <= right && right <= 5).then_some(FieldSpec { left, right })
    }

    /// Inverse of [`FieldSpec::encode`]. Returns `None` for values that are not `8L + R`
    /// with `L <= R <= 5`.
    pub fn decode(f: u8) -> Option<FieldSpec> {
        FieldSpec::new(f / 8, f % 8)
    }

    pub fn encode(self) -> u8 {
        8 * self.left + self.right
    }

    pub fn left(&self) -> u8 {
        self.left
    }

    pub fn right(&self) -> u8 {
        self.right
    }

    pub fn includes_sign(&self) -> bool {
        self.left == 0
    }

    /// First non-sign byte covered, 1-based.
    fn first_byte(&self) -> usize {
        self.left.max(1) as usize
    }

    /// Number of non-sign bytes covered.
    fn width(&self) -> usize {
        (self.right as usize + 1).saturating_sub(self.first_byte())
    }
}

impl Default for FieldSpec {
    fn default() -> Self {
        FieldSpec::FULL
    }
}

impl fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}:{})", self.left, self.right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(sign: Sign, bytes: [u8; 5]) -> Word {
        Word::from_bytes(sign, bytes).unwrap()
    }

    #[test]
    fn integer_roundtrip() {
        for value in [0, 1, -1, 63, 64, -4095, 134_762_881, WORD_MAX, -WORD_MAX] {
            assert_eq!(Word::new(value).unwrap().value(), value);
        }
        assert_eq!(Word::new(WORD_RANGE), Err(WordError::OutOfRange(WORD_RANGE)));
        assert_eq!(Word::new(-WORD_RANGE), Err(WordError::OutOfRange(-WORD_RANGE)));
    }

    #[test]
    fn bytes_roundtrip() {
        let cases = [
            (Sign::Plus, [0, 0, 0, 0, 0]),
            (Sign::Minus, [0, 0, 0, 0, 0]),
            (Sign::Plus, [8, 2, 5, 6, 1]),
            (Sign::Minus, [63, 63, 63, 63, 63]),
        ];
        for (sign, bytes) in cases {
            let w = word(sign, bytes);
            assert_eq!(w.sign(), sign);
            assert_eq!(w.bytes(), bytes);
        }
        assert_eq!(
            Word::from_bytes(Sign::Plus, [0, 64, 0, 0, 0]),
            Err(WordError::ByteOutOfRange(64))
        );
    }

    #[test]
    fn byte_layout() {
        let w = Word::new(134_762_881).unwrap();
        assert_eq!(w.bytes(), [8, 2, 5, 6, 1]);
        assert_eq!(Word::new(130).unwrap().field(FieldSpec::new(1, 4).unwrap()).value(), 2);
    }

    #[test]
    fn field_spec_encoding() {
        for left in 0..=5 {
            for right in left..=5 {
                let spec = FieldSpec::new(left, right).unwrap();
                assert_eq!(FieldSpec::decode(spec.encode()), Some(spec));
            }
        }
        assert_eq!(FieldSpec::FULL.encode(), 5);
        assert_eq!(FieldSpec::new(3, 2), None);
        assert_eq!(FieldSpec::new(0, 6), None);
        assert_eq!(FieldSpec::decode(6), None);
    }

    #[test]
    fn extract_field() {
        let w = word(Sign::Minus, [1, 2, 3, 4, 5]);
        let spec = |l, r| FieldSpec::new(l, r).unwrap();

        assert_eq!(w.field(spec(0, 5)), w);
        assert_eq!(w.field(spec(1, 5)), word(Sign::Plus, [1, 2, 3, 4, 5]));
        assert_eq!(w.field(spec(3, 5)), word(Sign::Plus, [0, 0, 3, 4, 5]));
        assert_eq!(w.field(spec(0, 3)), word(Sign::Minus, [0, 0, 1, 2, 3]));
        assert_eq!(w.field(spec(4, 4)), word(Sign::Plus, [0, 0, 0, 0, 4]));
        assert_eq!(w.field(spec(0, 0)), word(Sign::Minus, [0, 0, 0, 0, 0]));
    }

    #[test]
    fn store_field_only_touches_field() {
        let original = word(Sign::Minus, [1, 2, 3, 4, 5]);
        let src = word(Sign::Plus, [6, 7, 8, 9, 0]);
        let spec = |l, r| FieldSpec::new(l, r).unwrap();

        let cases = [
            (spec(0, 5), word(Sign::Plus, [6, 7, 8, 9, 0])),
            (spec(1, 5), word(Sign::Minus, [6, 7, 8, 9, 0])),
            (spec(5, 5), word(Sign::Minus, [1, 2, 3, 4, 0])),
            (spec(2, 2), word(Sign::Minus, [1, 0, 3, 4, 5])),
            (spec(2, 3), word(Sign::Minus, [1, 9, 0, 4, 5])),
            (spec(0, 1), word(Sign::Plus, [0, 2, 3, 4, 5])),
            (spec(0, 0), word(Sign::Plus, [1, 2, 3, 4, 5])),
        ];
        for (spec, expected) in cases {
            let mut dest = original;
            dest.set_field(spec, src);
            assert_eq!(dest, expected, "store {spec}");
        }
    }

    #[test]
    fn extract_then_store_reproduces_word() {
        let original = word(Sign::Minus, [10, 20, 30, 40, 50]);
        for left in 0..=5 {
            for right in left..=5 {
                let spec = FieldSpec::new(left, right).unwrap();
                let mut copy = Word::ZERO;
                copy.set_field(FieldSpec::FULL, original);
                copy.set_field(spec, original.field(spec));
                assert_eq!(copy, original, "{spec}");
            }
        }
    }

    #[test]
    fn signed_zero() {
        let plus = Word::ZERO;
        let minus = Word::ZERO.negated();
        assert_ne!(plus, minus);
        assert_eq!(plus.compare(&minus), Ordering::Equal);
        assert_eq!(minus.value(), 0);

        let a = Word::new(-7).unwrap();
        let b = Word::new(3).unwrap();
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(b.compare(&a), Ordering::Greater);
    }

    #[test]
    fn instruction_parts() {
        let w = Word::instruction(-2000, 3, 5, 24).unwrap();
        assert_eq!(w.address(), -2000);
        assert_eq!(w.index(), 3);
        assert_eq!(w.modifier(), 5);
        assert_eq!(w.opcode(), 24);
        assert!(Word::instruction(4096, 0, 5, 8).is_err());
    }

    #[test]
    fn wrapping_keeps_low_bytes() {
        let (w, overflow) = Word::wrapping(Sign::Minus, WORD_RANGE + 5);
        assert!(overflow);
        assert_eq!(w.value(), -5);
        let (w, overflow) = Word::wrapping(Sign::Plus, 17);
        assert!(!overflow);
        assert_eq!(w.value(), 17);
    }
}
