//! Execution-level golden tests: compile a program, link it against the C
//! runtime with the system compiler, run the binary, and diff its stdout.
//!
//! These need `cc` and an x86-64 Linux host, so they are `#[ignore]`d by
//! default; run them with `cargo test --test golden -- --ignored`.

use std::path::Path;
use std::process::Command;

use toyc::compile_source;

fn runtime_path() -> String {
  format!("{}/runtime/runtime.c", env!("CARGO_MANIFEST_DIR"))
}

/// Compile, link, run; return (stdout, exit code).
fn run_program(name: &str, src: &str) -> (String, i32) {
  let dir = tempfile::tempdir().expect("no tempdir");
  let asm = compile_source(&format!("{name}.toy"), src).expect("compile failed");
  let asm_path = dir.path().join(format!("{name}.s"));
  std::fs::write(&asm_path, asm).expect("cannot write assembly");

  let bin_path = dir.path().join(name);
  let status = Command::new("cc")
    .arg(&asm_path)
    .arg(runtime_path())
    .arg("-o")
    .arg(&bin_path)
    .status()
    .expect("cc not available");
  assert!(status.success(), "cc failed for {name}");

  let output = Command::new(&bin_path).output().expect("cannot run compiled program");
  let stdout = String::from_utf8(output.stdout).expect("non-utf8 program output");
  (stdout, output.status.code().expect("no exit code"))
}

fn assert_golden(name: &str, src: &str, expected_stdout: &str, expected_exit: i32) {
  let (stdout, exit) = run_program(name, src);
  assert_eq!(stdout, expected_stdout, "stdout mismatch for {name}");
  assert_eq!(exit, expected_exit, "exit code mismatch for {name}");
}

#[test]
#[ignore = "requires cc and an x86-64 Linux host"]
fn hello_integer() {
  assert_golden(
    "hello",
    "extern fn print_int(x: i64) -> unit;\n\
     fn main() -> i64 { print_int(42); return 0; }\n",
    "42\n",
    0,
  );
}

#[test]
#[ignore = "requires cc and an x86-64 Linux host"]
fn defer_order_is_lifo() {
  assert_golden(
    "defer_order",
    "extern fn print_int(x: i64) -> unit;\n\
     fn main() -> i64 {\n\
       defer print_int(1);\n\
       defer print_int(2);\n\
       defer print_int(3);\n\
       return 0;\n\
     }\n",
    "3\n2\n1\n",
    0,
  );
}

#[test]
#[ignore = "requires cc and an x86-64 Linux host"]
fn defer_captures_by_value() {
  assert_golden(
    "defer_capture",
    "extern fn print_int(x: i64) -> unit;\n\
     fn main() -> i64 {\n\
       var x: i64 = 10;\n\
       defer print_int(x);\n\
       x = 99;\n\
       return 0;\n\
     }\n",
    "10\n",
    0,
  );
}

#[test]
#[ignore = "requires cc and an x86-64 Linux host"]
fn defer_runs_on_every_exit_path() {
  assert_golden(
    "defer_paths",
    "extern fn print_int(x: i64) -> unit;\n\
     fn f(x: bool) -> unit { defer print_int(1); if x { defer print_int(2); return; } }\n\
     fn main() -> i64 { f(true); f(false); return 0; }\n",
    "2\n1\n1\n",
    0,
  );
}

#[test]
#[ignore = "requires cc and an x86-64 Linux host"]
fn struct_field_layout() {
  assert_golden(
    "layout",
    "struct P { a: bool; b: i64; c: bool; }\n\
     extern fn print_int(x: i64) -> unit;\n\
     fn main() -> i64 {\n\
       var p: P;\n\
       p.a = true; p.b = 7; p.c = false;\n\
       print_int(p.b); return 0;\n\
     }\n",
    "7\n",
    0,
  );
}

#[test]
#[ignore = "requires cc and an x86-64 Linux host"]
fn short_circuit_skips_the_right_operand() {
  assert_golden(
    "short_circuit",
    "extern fn print_int(x: i64) -> unit;\n\
     fn f() -> bool { return false; }\n\
     fn g() -> bool { print_int(999); return true; }\n\
     fn main() -> i64 { f() && g(); return 0; }\n",
    "",
    0,
  );
}

#[test]
#[ignore = "requires cc and an x86-64 Linux host"]
fn exit_code_is_mains_return_value() {
  assert_golden("exit_code", "fn main() -> i64 { return 7; }\n", "", 7);
}

#[test]
#[ignore = "requires cc and an x86-64 Linux host"]
fn while_loops_and_arithmetic() {
  assert_golden(
    "loops",
    "extern fn print_int(x: i64) -> unit;\n\
     fn main() -> i64 {\n\
       var sum: i64 = 0;\n\
       var i: i64 = 1;\n\
       while i <= 10 { sum = sum + i; i = i + 1; }\n\
       print_int(sum);\n\
       return 0;\n\
     }\n",
    "55\n",
    0,
  );
}

#[test]
#[ignore = "requires cc and an x86-64 Linux host"]
fn pointers_and_indexing() {
  assert_golden(
    "pointers",
    "extern fn print_int(x: i64) -> unit;\n\
     extern fn malloc(n: u64) -> *u8;\n\
     fn main() -> i64 {\n\
       var x: i64 = 5;\n\
       var p: *i64 = &x;\n\
       *p = 6;\n\
       print_int(x);\n\
       return 0;\n\
     }\n",
    "6\n",
    0,
  );
}
