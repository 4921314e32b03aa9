//! End-to-end scenarios: compile a C source to an executable and check
//! its exit code (or, for diagnostic-only cases, the pinned messages
//! `compile_to_assembly` collects). Mirrors the corpus this project was
//! distilled from (`original_source/tests/ctests`, `feature_tests`, and
//! `general_tests/pi`), rewritten as small self-contained programs.

use shivc::CompilerConfig;
use std::io::Write;
use std::path::Path;
use std::process::Command;

/// Compile `source` and run the resulting executable, returning its
/// exit code. Panics if compilation or linking fails.
fn compile_and_run(dir: &Path, name: &str, source: &str) -> i32 {
    let src_path = dir.join(format!("{name}.c"));
    std::fs::File::create(&src_path)
        .unwrap()
        .write_all(source.as_bytes())
        .unwrap();
    let out_path = dir.join(name);

    let (diags, result) = shivc::compile_file(&src_path, &out_path);
    result.unwrap_or_else(|e| panic!("compile failed for {name}: {e} (diagnostics: {:?})", diags.sorted()));

    let status = Command::new(&out_path).status().unwrap();
    status.code().expect("process exited via signal")
}

/// Like [`compile_and_run`] but also returns captured stdout.
fn compile_and_capture(dir: &Path, name: &str, source: &str) -> (i32, String) {
    let src_path = dir.join(format!("{name}.c"));
    std::fs::File::create(&src_path)
        .unwrap()
        .write_all(source.as_bytes())
        .unwrap();
    let out_path = dir.join(name);

    let (diags, result) = shivc::compile_file(&src_path, &out_path);
    result.unwrap_or_else(|e| panic!("compile failed for {name}: {e} (diagnostics: {:?})", diags.sorted()));

    let output = Command::new(&out_path).output().unwrap();
    (
        output.status.code().expect("process exited via signal"),
        String::from_utf8_lossy(&output.stdout).into_owned(),
    )
}

/// Compile `source` without linking and return its diagnostics,
/// formatted the pinned `<line>: <kind>: <message>` way.
fn diagnostics_for(dir: &Path, name: &str, source: &str) -> Vec<String> {
    let src_path = dir.join(format!("{name}.c"));
    std::fs::File::create(&src_path)
        .unwrap()
        .write_all(source.as_bytes())
        .unwrap();
    let config = CompilerConfig::new();
    let (diags, _) = shivc::compile_to_assembly(&src_path, &config);
    diags.sorted().into_iter().map(|d| d.to_string()).collect()
}

#[test]
fn arithmetic_chains_and_64_bit_immediates() {
    let dir = tempfile::tempdir().unwrap();
    let code = compile_and_run(
        dir.path(),
        "addition",
        r#"
int main() {
  int a = 5; int b = 10;
  int c = a + b;
  if (c != 15) return 1;

  long big = 1099511627776;
  long sum = big + 1099511627776;
  if (sum != 1099511627776 + 1099511627776) return 2;

  long via_var = big;
  if (via_var + big != sum) return 3;

  return 0;
}
"#,
    );
    assert_eq!(code, 0);
}

#[test]
fn nested_conditionals_reach_the_expected_return() {
    let dir = tempfile::tempdir().unwrap();
    let code = compile_and_run(
        dir.path(),
        "if_cascade",
        r#"
int main() {
  if (0) return 1;
  int a = 0;
  if (a) return 2;
  int b = 10; int c = 11;
  if (b == c) return 3;
  if (b != c) {
    if (b * 0) return 4;
    if (3 == 4) return 5;
    if (3 != 3) return 6;
    b = 3;
    if (b != 3) return 7;
    int ret1;
    if (b == 3) {
      ret1 = 10;
      if (3 == 3) {
        int ret2 = ret1 + 10;
        if (5) {
          return ret2 + 10;
        }
      }
    }
  }
  return 8;
}
"#,
    );
    assert_eq!(code, 30);
}

#[test]
fn array_subscript_is_commutative_with_pointer_offset() {
    let dir = tempfile::tempdir().unwrap();
    let code = compile_and_run(
        dir.path(),
        "array",
        r#"
int main() {
  int array[5];
  if (&array[3] != &array[0] + 3) return 1;

  *array = 15;
  if (*array != 15) return 2;
  if (4[array] != 0) return 3;

  array[1] = 35;
  array[3] = 10;
  array[4] = array[1] + array[3];

  int sum = 0;
  int i = 0;
  while (i != 5) {
    sum = sum + array[i];
    i = i + 1;
  }
  if (sum != 15 + 35 + 0 + 10 + 45) return 4;

  return 0;
}
"#,
    );
    assert_eq!(code, 0);
}

#[test]
fn while_loop_runs_the_expected_number_of_times() {
    let dir = tempfile::tempdir().unwrap();
    let code = compile_and_run(
        dir.path(),
        "while_loop",
        r#"
int main() {
  int a = 0;
  while (a != 5) a = a + 1;
  if (a != 5) return 1;

  int b = 0;
  a = 0;
  while (a != 5) {
    b = b + a;
    a = a + 1;
  }
  if (b != 10) return 2;

  while (b == 100) return 3;

  int ran = 0;
  while (b == 10) {
    b = b + 1;
    ran = ran + 1;
    if (ran != 1) return 4;
  }

  return 0;
}
"#,
    );
    assert_eq!(code, 0);
}

#[test]
fn pointer_dereference_on_both_sides_of_assignment() {
    let dir = tempfile::tempdir().unwrap();
    let code = compile_and_run(
        dir.path(),
        "pointer_lvalue",
        r#"
int main() {
  int a = 1;
  int* p1 = &a;
  *p1 = 2;
  if (a != 2) return 1;

  int b;
  *(&b) = 3;
  if (b != 3) return 2;

  int c;
  int* p2 = &c + 2;
  *p2 = 4;
  int* p3 = &c + 2;
  if (*p2 != *p3) return 3;

  return 0;
}
"#,
    );
    assert_eq!(code, 0);
}

#[test]
fn pointer_and_null_equality_cases() {
    let dir = tempfile::tempdir().unwrap();
    let code = compile_and_run(
        dir.path(),
        "equality",
        r#"
int main() {
  int a = 5; int b = 10;
  if (a == b) return 1;
  if (&a == &b) return 2;
  if (&a != &a) return 3;
  if (&a == 0) return 4;
  if (0 == &a) return 5;

  void* v = &a;
  if (v == 0) return 6;
  if (v != &a) return 7;

  return 0;
}
"#,
    );
    assert_eq!(code, 0);
}

#[test]
fn character_constants_and_escapes() {
    let dir = tempfile::tempdir().unwrap();
    let code = compile_and_run(
        dir.path(),
        "char_escapes",
        r#"
int strcmp(char*, char*);
int main() {
  if (strcmp("hello", "hello")) return 1;
  if ('a' != 97) return 2;
  if ('f' - 'a' != 5) return 3;
  if ('\'' != 39) return 4;
  if ('"' != 34) return 5;
  if ('\n' != 10) return 6;
  if ('\\' != 92) return 7;
  if (' ' != 32) return 8;
  if ('\101' != 65) return 9;
  if ('\x41' != 65) return 10;
  return 0;
}
"#,
    );
    assert_eq!(code, 0);
}

#[test]
fn calls_into_libc_and_the_div_quotient_workaround() {
    let dir = tempfile::tempdir().unwrap();
    let code = compile_and_run(
        dir.path(),
        "function_call",
        r#"
int isalpha(int);
int div(int, int);
int strcmp(char*, char*);

int main() {
  if (isalpha(65) != 1) return 1;
  if (isalpha(52) != 0) return 2;

  // div's true return type is a struct, but the quotient comes back in
  // the integer return register, so declaring it as `int` is enough.
  if (div(50, 5) != 10) return 3;

  if (strcmp("abc", "abc") != 0) return 4;

  int (*f)(int) = isalpha;
  if (f(53) != 0) return 5;

  return 0;
}
"#,
    );
    assert_eq!(code, 0);
}

#[test]
fn multi_argument_calls_preserve_argument_order_under_register_pressure() {
    // A non-commutative callee makes an argument swap observable: if
    // the two arguments were ever assigned to each other's ABI
    // registers (or any other pair's), `sub` would silently receive
    // them backwards. The extra live locals raise register pressure so
    // the arguments are not trivially assigned to their target
    // registers by coincidence.
    let dir = tempfile::tempdir().unwrap();
    let code = compile_and_run(
        dir.path(),
        "call_argument_order",
        r#"
int sub(int a, int b) {
  return a - b;
}

int combine(int a, int b, int c, int d, int e, int f) {
  return a - b - c - d - e - f;
}

int main() {
  int v0 = 1; int v1 = 2; int v2 = 3; int v3 = 4;
  int v4 = 5; int v5 = 6; int v6 = 7; int v7 = 8;
  int x = 100; int y = 37;

  if (sub(x, y) != 63) return 1;
  if (sub(y, x) != -63) return 2;

  int pressure = v0 + v1 + v2 + v3 + v4 + v5 + v6 + v7;
  if (pressure != 36) return 3;

  if (combine(100, 1, 2, 3, 4, 5) != 85) return 4;

  return 0;
}
"#,
    );
    assert_eq!(code, 0);
}

#[test]
fn sizeof_reports_the_right_widths() {
    let dir = tempfile::tempdir().unwrap();
    let code = compile_and_run(
        dir.path(),
        "sizeof_widths",
        r#"
int global;
int touches_global() {
  global = 10;
  return 4;
}

int main() {
  if (sizeof(_Bool) != 1) return 1;
  if (sizeof(char) != 1) return 2;
  if (sizeof(short) != 2) return 3;
  if (sizeof(int) != 4) return 4;
  if (sizeof(long) != 8) return 5;
  if (sizeof(int*) != 8) return 6;

  int a = 1;
  if (sizeof(a) != 4) return 7;
  if (sizeof 32 != 4) return 8;

  int arr[3];
  if (sizeof(arr) != 12) return 9;
  if (sizeof(arr) / sizeof(arr[0]) != 3) return 10;

  // sizeof never evaluates its operand.
  if (sizeof(touches_global()) != 4) return 11;
  if (global != 0) return 12;

  return 0;
}
"#,
    );
    assert_eq!(code, 0);
}

#[test]
fn struct_member_offsets_and_pointer_to_struct() {
    let dir = tempfile::tempdir().unwrap();
    let code = compile_and_run(
        dir.path(),
        "struct_access",
        r#"
struct A {
  int a_one;
  long a_two;
  int a_three;
};

int main() {
  struct A a;
  struct A *q = &a;

  a.a_one = 10;
  if (a.a_one != 10) return 1;

  (*q).a_three = 15;
  if (a.a_three != 15) return 2;
  if (q->a_three != 15) return 3;

  long* p = &a.a_two;
  *p = 20;
  if (a.a_two != 20) return 4;

  struct A array[4];
  array[2].a_one = 7;
  if (array[2].a_one != 7) return 5;

  return 0;
}
"#,
    );
    assert_eq!(code, 0);
}

#[test]
fn both_initializer_styles_produce_the_same_value() {
    let dir = tempfile::tempdir().unwrap();
    let code = compile_and_run(
        dir.path(),
        "dual_initializer",
        r#"
int main() {
  int a = 0;
  int b;
  b = 0;
  if (a != b) return 1;

  a = a + 1;
  b = b + 1;
  if (a != 1) return 2;
  if (b != 1) return 3;

  return 0;
}
"#,
    );
    assert_eq!(code, 0);
}

#[test]
fn a_local_variable_shadows_an_outer_typedef_of_the_same_name() {
    // `T` is a typedef everywhere outside `main`, but the inner `int T;`
    // redeclares it as an ordinary variable for the rest of the block —
    // `T = 1;` must parse as an assignment, not a declaration with `T`
    // as a (now shadowed) type-specifier.
    let dir = tempfile::tempdir().unwrap();
    let code = compile_and_run(
        dir.path(),
        "typedef_shadow",
        r#"
typedef int T;

T make_one() {
  T v = 1;
  return v;
}

int main() {
  int T;
  T = 1;
  if (T != 1) return 1;

  T += make_one();
  if (T != 2) return 2;

  return 0;
}
"#,
    );
    assert_eq!(code, 0);
}

#[test]
fn a_return_statement_duplicated_on_its_own_line_still_compiles() {
    let dir = tempfile::tempdir().unwrap();
    let code = compile_and_run(
        dir.path(),
        "duplicate_return",
        r#"
int main() {
  return 13;
  return 13;
}
"#,
    );
    assert_eq!(code, 13);
}

#[test]
fn a_missing_semicolon_fails_to_compile() {
    let dir = tempfile::tempdir().unwrap();
    let diags = diagnostics_for(
        dir.path(),
        "missing_semicolon",
        r#"
int main() {
  int a = 1
  return a;
}
"#,
    );
    assert!(!diags.is_empty(), "expected at least one diagnostic");
}

#[test]
fn error_function_call_emits_the_pinned_messages_at_the_right_lines() {
    let dir = tempfile::tempdir().unwrap();
    let diags = diagnostics_for(
        dir.path(),
        "error_function_call",
        r#"
int isalpha(int);
int isdigit(void);

int main() {
  int a;

  a();

  isalpha();

  isalpha(10, 10);

  isdigit();

  isdigit(1);

  return 0;
}
"#,
    );
    let joined = diags.join("\n");
    assert!(joined.contains("8: error: called object is not a function pointer"));
    assert!(joined.contains(
        "10: error: incorrect number of arguments for function call (expected 1, have 0)"
    ));
    assert!(joined.contains(
        "12: error: incorrect number of arguments for function call (expected 1, have 2)"
    ));
    assert!(joined.contains(
        "16: error: incorrect number of arguments for function call (expected 0, have 1)"
    ));
}

#[test]
fn the_pi_spigot_program_prints_the_first_digits_of_pi() {
    // Same unbounded-spigot algorithm as the combined smoke test this
    // mirrors, rewritten with explicit statements in place of its
    // original comma-expression `for` clauses (comma is not a supported
    // operator here).
    let dir = tempfile::tempdir().unwrap();
    let (_, stdout) = compile_and_capture(
        dir.path(),
        "pi",
        r#"
#include <stdio.h>

int main() {
  int a = 10000;
  int b = 0;
  int c = 2800;
  int d = 0;
  int e = 0;
  int f[2801];
  int g = 0;

  while (b != c) {
    f[b] = a / 5;
    b += 1;
  }

  while (1) {
    d = 0;
    g = c * 2;
    if (g == 0) break;

    b = c;
    while (1) {
      d += f[b] * a;
      g -= 1;
      f[b] = d % g;
      d /= g;
      g -= 1;
      b -= 1;
      if (b == 0) break;
      d *= b;
    }

    c -= 14;
    printf("%.4d", e + d / a);
    e = d % a;
  }
  printf("\n");
  return 0;
}
"#,
    );
    assert!(stdout.starts_with("3141592653589793"));
}
