use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;

fn mixal() -> Command {
    Command::cargo_bin("mixal").unwrap()
}

#[test]
fn stores_accumulator() {
    let mut cmd = mixal();
    cmd.arg("run").arg("tests/files/store.mixal").arg("--minimal");

    cmd.assert()
        .success()
        .stdout(contains("A +5\n"))
        .stdout(contains("3003 +5\n"));
}

#[test]
fn counts_with_local_labels() {
    let mut cmd = mixal();
    cmd.arg("run").arg("tests/files/loop.mixal").arg("--minimal");

    cmd.assert()
        .success()
        .stdout(contains("I1 +10\n"))
        .stdout(contains("CI EQUAL\n"));
}

#[test]
fn fixed_columns_match_free_format() {
    let free = mixal()
        .arg("dump")
        .arg("tests/files/loop.mixal")
        .arg("--minimal")
        .output()
        .unwrap();
    let fixed = mixal()
        .arg("dump")
        .arg("tests/files/loop_fixed.mixal")
        .arg("--fixed")
        .arg("--minimal")
        .output()
        .unwrap();
    assert!(free.status.success());
    assert!(fixed.status.success());
    assert_eq!(free.stdout, fixed.stdout);
}

#[test]
fn division_by_zero_continues() {
    let mut cmd = mixal();
    cmd.arg("run").arg("tests/files/divzero.mixal").arg("--minimal");

    cmd.assert()
        .success()
        .stdout(contains("A +0\n"))
        .stdout(contains("X +3\n"))
        .stdout(contains("OV 1\n"));
}

#[test]
fn prints_without_waiting() {
    let mut cmd = mixal();
    cmd.arg("run").arg("tests/files/hello.mixal").arg("--minimal");

    cmd.assert()
        .success()
        .stdout(contains("HELLO\n"))
        .stdout(contains("A +1\n"));
}

#[test]
fn busy_printer_is_awaited() {
    let mut cmd = mixal();
    cmd.env("MIX_IO_LATENCY", "50")
        .arg("run")
        .arg("tests/files/hello.mixal")
        .arg("--minimal");

    cmd.assert()
        .success()
        .stdout(contains("HELLO\n"))
        .stdout(contains("A +1\n"));
}

#[test]
fn reads_cards() {
    let mut cmd = mixal();
    cmd.arg("run")
        .arg("tests/files/cards.mixal")
        .arg("--cards")
        .arg("tests/files/cards.txt")
        .arg("--minimal");

    cmd.assert().success().stdout(contains("MIX 1009\n"));
}

#[test]
fn step_limit_stops_loop() {
    let mut cmd = mixal();
    cmd.arg("run")
        .arg("tests/files/loop.mixal")
        .arg("--max-steps")
        .arg("4")
        .arg("--minimal");

    cmd.assert().success().stdout(contains("I1 +1\n"));
}

#[test]
fn reports_undefined_symbol() {
    let mut cmd = mixal();
    cmd.arg("check").arg("tests/files/undefined.mixal");

    cmd.assert()
        .failure()
        .stderr(contains("asm::undefined_symbol"))
        .stderr(contains("NOWHERE"));
}

#[test]
fn checks_valid_program() {
    let mut cmd = mixal();
    cmd.arg("check").arg("tests/files/loop.mixal");

    cmd.assert().success().stderr(contains("no errors found"));
}

#[test]
fn compiled_object_runs() {
    let dest = std::env::temp_dir().join(format!("mixal-loop-{}.mix", std::process::id()));
    mixal()
        .arg("compile")
        .arg("tests/files/loop.mixal")
        .arg(&dest)
        .assert()
        .success();

    let mut cmd = mixal();
    cmd.arg("run").arg(&dest).arg("--minimal");
    cmd.assert().success().stdout(contains("I1 +10\n"));

    let _ = std::fs::remove_file(dest);
}

#[test]
fn rejects_unknown_extension() {
    let mut cmd = mixal();
    cmd.arg("run").arg("tests/files/cards.txt");

    cmd.assert()
        .failure()
        .stderr(contains("unknown extension"))
        .stdout(predicate::str::is_empty());
}
