//! Driver-level tests: every CLI mode, the stdlib include preprocessor,
//! and exit codes.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

fn toyc() -> Command {
  Command::cargo_bin("toyc").expect("binary not built")
}

fn write_source(dir: &tempfile::TempDir, name: &str, text: &str) -> std::path::PathBuf {
  let path = dir.path().join(name);
  fs::write(&path, text).expect("cannot write test source");
  path
}

const HELLO: &str = "extern fn print_int(x: i64) -> unit;\n\
  fn main() -> i64 { print_int(42); return 0; }\n";

#[test]
fn missing_path_is_a_usage_error() {
  toyc().assert().failure();
}

#[test]
fn default_mode_dumps_the_ast() {
  let dir = tempfile::tempdir().expect("no tempdir");
  let src = write_source(&dir, "hello.toy", HELLO);
  toyc()
    .arg(&src)
    .assert()
    .success()
    .stdout(predicate::str::contains("ExternFn").and(predicate::str::contains("main")));
}

#[test]
fn tokens_mode_dumps_the_stream() {
  let dir = tempfile::tempdir().expect("no tempdir");
  let src = write_source(&dir, "hello.toy", HELLO);
  toyc()
    .arg(&src)
    .arg("--tokens")
    .assert()
    .success()
    .stdout(predicate::str::contains("KwExtern").and(predicate::str::contains("Arrow")));
}

#[test]
fn symbols_mode_dumps_layouts() {
  let dir = tempfile::tempdir().expect("no tempdir");
  let src = write_source(&dir, "s.toy", "struct P { a: bool; b: i64; }\n");
  toyc()
    .arg(&src)
    .arg("--symbols")
    .assert()
    .success()
    .stdout(predicate::str::contains("StructLayout").and(predicate::str::contains("offset: 8")));
}

#[test]
fn typecheck_mode_reports_ok() {
  let dir = tempfile::tempdir().expect("no tempdir");
  let src = write_source(&dir, "hello.toy", HELLO);
  toyc()
    .arg(&src)
    .arg("--typecheck")
    .assert()
    .success()
    .stdout(predicate::str::contains("typecheck OK"));
}

#[test]
fn lower_mode_shows_the_exit_label() {
  let dir = tempfile::tempdir().expect("no tempdir");
  let src = write_source(&dir, "hello.toy", HELLO);
  toyc()
    .arg(&src)
    .arg("--lower")
    .assert()
    .success()
    .stdout(predicate::str::contains("__fn_exit_main").and(predicate::str::contains("__ret_main")));
}

#[test]
fn emit_dash_writes_assembly_to_stdout() {
  let dir = tempfile::tempdir().expect("no tempdir");
  let src = write_source(&dir, "hello.toy", HELLO);
  toyc()
    .arg(&src)
    .args(["--emit", "-"])
    .assert()
    .success()
    .stdout(
      predicate::str::starts_with(".intel_syntax noprefix")
        .and(predicate::str::contains("call print_int")),
    );
}

#[test]
fn emit_writes_the_given_path() {
  let dir = tempfile::tempdir().expect("no tempdir");
  let src = write_source(&dir, "hello.toy", HELLO);
  let out = dir.path().join("hello.s");
  toyc().arg(&src).arg("--emit").arg(&out).assert().success();
  let asm = fs::read_to_string(&out).expect("no assembly written");
  assert!(asm.contains(".globl main"));
}

#[test]
fn mode_flags_are_mutually_exclusive() {
  let dir = tempfile::tempdir().expect("no tempdir");
  let src = write_source(&dir, "hello.toy", HELLO);
  toyc().arg(&src).args(["--tokens", "--typecheck"]).assert().failure();
}

#[test]
fn compile_errors_exit_nonzero_with_one_message() {
  let dir = tempfile::tempdir().expect("no tempdir");
  let src = write_source(&dir, "bad.toy", "fn f() -> unit { var x: i64 = true; }\n");
  toyc()
    .arg(&src)
    .arg("--typecheck")
    .assert()
    .failure()
    .stderr(predicate::str::contains("type error").and(predicate::str::contains("bad.toy")));
}

#[test]
fn stdlib_directive_prepends_library_sources() {
  let dir = tempfile::tempdir().expect("no tempdir");
  let lib_dir = dir.path().join("stdlib");
  fs::create_dir(&lib_dir).expect("cannot create stdlib dir");
  fs::write(lib_dir.join("io.toy"), "extern fn print_int(x: i64) -> unit;\n")
    .expect("cannot write stdlib module");
  let src = write_source(
    &dir,
    "main.toy",
    "// stdlib: io\nfn main() -> i64 { print_int(1); return 0; }\n",
  );
  toyc()
    .arg(&src)
    .arg("--stdlib")
    .arg(&lib_dir)
    .arg("--typecheck")
    .assert()
    .success()
    .stdout(predicate::str::contains("typecheck OK"));
}

#[test]
fn missing_stdlib_module_is_reported() {
  let dir = tempfile::tempdir().expect("no tempdir");
  let src = write_source(&dir, "main.toy", "// stdlib: nope\nfn main() -> i64 { return 0; }\n");
  toyc()
    .arg(&src)
    .arg("--stdlib")
    .arg(dir.path())
    .arg("--typecheck")
    .assert()
    .failure()
    .stderr(predicate::str::contains("nope"));
}

#[test]
fn shipped_stdlib_modules_typecheck() {
  let dir = tempfile::tempdir().expect("no tempdir");
  let src = write_source(
    &dir,
    "main.toy",
    "// stdlib: io, mem\n\
     fn main() -> i64 {\n\
       var p: *u8 = malloc(16);\n\
       defer free(p);\n\
       print_int(0);\n\
       return 0;\n\
     }\n",
  );
  toyc()
    .current_dir(env!("CARGO_MANIFEST_DIR"))
    .arg(&src)
    .arg("--typecheck")
    .assert()
    .success();
}
