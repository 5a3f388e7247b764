//! End-to-end compilation tests: whole sources through lexer, parser,
//! evaluator and the textual renderer, with module trees materialised
//! in temp directories.

use mic_diagnostic::DiagnosticKind;
use micc::Compiler;
use std::fs;
use tempfile::TempDir;

/// Write the given modules into a temp dir and compile the first one.
fn compile(files: &[(&str, &str)]) -> (Compiler, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    for (name, source) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("module dirs");
        }
        fs::write(&path, source).expect("module source");
    }
    let main = dir.path().join(files[0].0);
    let mut compiler = Compiler::new(Vec::new());
    compiler.compile_main(&main);
    (compiler, dir)
}

fn ir_text(compiler: &Compiler) -> String {
    String::from_utf8(compiler.manager.render_text(Vec::new())).expect("utf8 IR")
}

fn assert_clean(compiler: &Compiler) {
    let msgs: Vec<String> = compiler
        .session
        .diags
        .iter()
        .map(|d| d.to_string())
        .collect();
    assert!(
        !compiler.session.diags.has_errors(),
        "unexpected diagnostics: {msgs:?}"
    );
}

/// The needles must appear in the text in the given order.
fn assert_in_order(text: &str, needles: &[&str]) {
    let mut at = 0;
    for needle in needles {
        match text[at..].find(needle) {
            Some(i) => at += i + needle.len(),
            None => panic!("missing '{needle}' (in order) in:\n{text}"),
        }
    }
}

#[test]
fn bit_builtin_widens_and_narrows() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; VAR a: UINT8; BEGIN a := BITOR(a, 0x0F) END M.",
    )]);
    assert_clean(&compiler);
    let text = ir_text(&compiler);
    assert_in_order(
        &text,
        &["ldvar a", "conv U4", "ldc_i4 15", "or", "conv U1", "stvar a"],
    );
}

#[test]
fn forward_reference_resolves_at_section_end() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; TYPE P = POINTER TO R; R = RECORD x: P END; END M.",
    )]);
    assert_clean(&compiler);

    let model = &compiler.session.model;
    let symbols = &compiler.session.symbols;
    let module = model.modules()[0];
    let p = model.find_member(module, symbols.intern("P")).expect("P");
    let r = model.find_member(module, symbols.intern("R")).expect("R");
    let base = model
        .pointer_base(model.decl(p).ty)
        .expect("P is a pointer");
    assert_eq!(base, model.deref(model.decl(r).ty));
}

#[test]
fn inc_emits_address_based_sequence() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; PROCEDURE f(); VAR i: INT32; BEGIN INC(i, 2) END f; END M.",
    )]);
    assert_clean(&compiler);
    let text = ir_text(&compiler);
    assert_in_order(
        &text,
        &["ldlocaddr i", "dup", "ldind I4", "ldc_i4 2", "add", "stind I4"],
    );
}

#[test]
fn import_cycle_is_one_module_diagnostic() {
    let (compiler, _dir) = compile(&[
        ("A.mic", "MODULE A; IMPORT B; END A."),
        ("B.mic", "MODULE B; IMPORT A; END B."),
    ]);
    let diags: Vec<_> = compiler.session.diags.iter().collect();
    assert_eq!(diags.len(), 1, "expected exactly one diagnostic: {diags:?}");
    assert_eq!(diags[0].kind, DiagnosticKind::Module);
    assert!(diags[0].message.contains("circular"));

    assert_eq!(compiler.manager.slots.len(), 2);
    assert!(compiler.manager.slots.iter().any(|s| s.decl.is_none()));
}

#[test]
fn println_string_then_newline() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; BEGIN PRINTLN(\"hi\") END M.",
    )]);
    assert_clean(&compiler);
    let text = ir_text(&compiler);
    assert_in_order(
        &text,
        &[
            "ldstr \"hi\"",
            "call $MIC.printStr",
            "ldc_i4 10",
            "call $MIC.printCh",
        ],
    );
}

#[test]
fn fold_time_division_by_zero_reports_once() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; CONST c = 1 / 0; VAR x: INT32; BEGIN x := c + 1 END M.",
    )]);
    let diags: Vec<_> = compiler.session.diags.iter().collect();
    assert_eq!(diags.len(), 1, "poisoned constant must not cascade: {diags:?}");
    assert_eq!(diags[0].kind, DiagnosticKind::Const);
    assert!(diags[0].message.contains("division by zero"));
}

#[test]
fn module_cache_is_idempotent() {
    let (mut compiler, _dir) = compile(&[
        ("A.mic", "MODULE A; IMPORT B, C; END A."),
        ("B.mic", "MODULE B; IMPORT C; END B."),
        ("C.mic", "MODULE C; VAR x*: INT32; END C."),
    ]);
    assert_clean(&compiler);
    // C was imported twice but compiled once
    assert_eq!(compiler.manager.slots.len(), 3);
    assert_eq!(compiler.manager.modules.len(), 3);

    // loading the same spec again yields the same declaration
    let spec = compiler.manager.slots[1].spec.clone();
    let before = compiler.manager.slots.len();
    let again = {
        use mic_parse::Importer;
        compiler
            .manager
            .load_module(&mut compiler.session, &spec)
    };
    assert_eq!(compiler.manager.slots.len(), before);
    assert_eq!(again, compiler.manager.slots[1].decl);
}

#[test]
fn len_folds_to_declared_length() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; VAR a: ARRAY 10 OF INT32; CONST n = LEN(a); END M.",
    )]);
    assert_clean(&compiler);
    let text = ir_text(&compiler);
    assert!(text.contains("const n: uint32 = 10"), "IR was:\n{text}");
}

#[test]
fn open_array_len_is_rejected() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; TYPE A = ARRAY OF INT32; VAR p: POINTER TO A; CONST n = LEN(p); END M.",
    )]);
    assert!(compiler.session.diags.has_errors());
    let first = compiler.session.diags.iter().next().unwrap();
    assert_eq!(first.kind, DiagnosticKind::Type);
}

#[test]
fn search_paths_resolve_dotted_modules() {
    let dir = TempDir::new().expect("temp dir");
    fs::create_dir_all(dir.path().join("lib/util")).unwrap();
    fs::write(
        dir.path().join("Main.mic"),
        "MODULE Main; IMPORT util.Strings; END Main.",
    )
    .unwrap();
    fs::write(
        dir.path().join("lib/util/Strings.mic"),
        "MODULE Strings; VAR n*: INT32; END Strings.",
    )
    .unwrap();

    let mut compiler = Compiler::new(vec![dir.path().join("lib")]);
    compiler.compile_main(&dir.path().join("Main.mic"));
    assert_clean(&compiler);
    assert_eq!(compiler.manager.slots.len(), 2);
}

#[test]
fn meta_actuals_instantiate_with_suffix() {
    let (compiler, _dir) = compile(&[
        (
            "Main.mic",
            "MODULE Main; IMPORT a := Buf(INT32, 4), b := Buf(INT64, 8); END Main.",
        ),
        (
            "Buf.mic",
            "MODULE Buf(TYPE T; CONST N: INT32); VAR data: ARRAY N OF T; END Buf.",
        ),
    ]);
    assert_clean(&compiler);
    // two distinct instantiations plus the main module
    assert_eq!(compiler.manager.slots.len(), 3);
    let text = ir_text(&compiler);
    assert!(text.contains("module Buf$1"), "IR was:\n{text}");
    assert!(text.contains("module Buf$2"), "IR was:\n{text}");
}

#[test]
fn same_meta_actuals_share_an_instance() {
    let (compiler, _dir) = compile(&[
        (
            "Main.mic",
            "MODULE Main; IMPORT a := Buf(INT32), b := Buf(INT32); END Main.",
        ),
        (
            "Buf.mic",
            "MODULE Buf(TYPE T); VAR x: T; END Buf.",
        ),
    ]);
    assert_clean(&compiler);
    assert_eq!(compiler.manager.slots.len(), 2);
}

#[test]
fn cross_module_constants_and_variables() {
    let (compiler, _dir) = compile(&[
        (
            "Main.mic",
            "MODULE Main; IMPORT Lib; VAR y: INT32; BEGIN y := Lib.limit; Lib.counter := y END Main.",
        ),
        (
            "Lib.mic",
            "MODULE Lib; CONST limit* = 100; VAR counter*: INT32; END Lib.",
        ),
    ]);
    assert_clean(&compiler);
    let text = ir_text(&compiler);
    assert_in_order(&text, &["ldc_i4 100", "stvar y"]);
    assert_in_order(&text, &["ldvar y", "stvar Lib.counter"]);
}

#[test]
fn private_members_are_hidden() {
    let (compiler, _dir) = compile(&[
        (
            "Main.mic",
            "MODULE Main; IMPORT Lib; VAR y: INT32; BEGIN y := Lib.hidden END Main.",
        ),
        ("Lib.mic", "MODULE Lib; VAR hidden: INT32; END Lib."),
    ]);
    assert!(compiler.session.diags.has_errors());
    let first = compiler.session.diags.iter().next().unwrap();
    assert_eq!(first.kind, DiagnosticKind::Scope);
}

#[test]
fn readonly_exports_reject_assignment() {
    let (compiler, _dir) = compile(&[
        (
            "Main.mic",
            "MODULE Main; IMPORT Lib; BEGIN Lib.count := 1 END Main.",
        ),
        ("Lib.mic", "MODULE Lib; VAR count-: INT32; END Lib."),
    ]);
    assert!(compiler.session.diags.has_errors());
}

#[test]
fn forward_procedure_completion_checks_signature() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M;\n\
         PROCEDURE ^ f(x: INT32): INT32;\n\
         PROCEDURE g(): INT32; BEGIN RETURN f(1) END g;\n\
         PROCEDURE f(x: INT32): INT32; BEGIN RETURN x END f;\n\
         END M.",
    )]);
    assert_clean(&compiler);

    let (bad, _dir2) = compile(&[(
        "M.mic",
        "MODULE M;\n\
         PROCEDURE ^ f(x: INT32): INT32;\n\
         PROCEDURE f(x: INT64): INT32; BEGIN RETURN 0 END f;\n\
         END M.",
    )]);
    assert!(bad.session.diags.has_errors());
    let first = bad.session.diags.iter().next().unwrap();
    assert_eq!(first.kind, DiagnosticKind::Forward);
}

#[test]
fn incomplete_forward_procedure_is_reported() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; PROCEDURE ^ f(); END M.",
    )]);
    assert!(compiler.session.diags.has_errors());
    let first = compiler.session.diags.iter().next().unwrap();
    assert_eq!(first.kind, DiagnosticKind::Forward);
}

#[test]
fn unresolved_type_is_a_forward_error() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; TYPE P = POINTER TO Missing; END M.",
    )]);
    assert!(compiler.session.diags.has_errors());
    let first = compiler.session.diags.iter().next().unwrap();
    assert_eq!(first.kind, DiagnosticKind::Forward);
    assert!(first.message.contains("Missing"));
}

#[test]
fn duplicate_names_report_at_second_site() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; VAR x: INT32; VAR x: INT64; END M.",
    )]);
    assert!(compiler.session.diags.has_errors());
    let first = compiler.session.diags.iter().next().unwrap();
    assert_eq!(first.kind, DiagnosticKind::Scope);
    assert_eq!(first.row, 1);
}

#[test]
fn return_inside_finally_is_rejected() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; PROCEDURE f(); BEGIN FINALLY RETURN END f; END M.",
    )]);
    assert!(compiler.session.diags.has_errors());
    assert!(compiler
        .session
        .diags
        .iter()
        .any(|d| d.message.contains("FINALLY")));
}

#[test]
fn exit_outside_loop_is_rejected() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; BEGIN EXIT END M.",
    )]);
    assert!(compiler.session.diags.has_errors());
}

#[test]
fn while_and_repeat_lowerings() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; VAR i: INT32;\n\
         BEGIN\n\
           WHILE i < 10 DO INC(i) END;\n\
           REPEAT DEC(i) UNTIL i = 0\n\
         END M.",
    )]);
    assert_clean(&compiler);
    let text = ir_text(&compiler);
    assert_in_order(&text, &["while", "clt", "do", "end"]);
    assert_in_order(&text, &["loop", "ceq", "if", "then", "exit", "end", "end"]);
}

#[test]
fn for_loop_uses_limit_temp() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; VAR i, s: INT32;\n\
         BEGIN FOR i := 1 TO 10 DO s := s + i END END M.",
    )]);
    assert_clean(&compiler);
    let text = ir_text(&compiler);
    assert_in_order(&text, &["ldc_i4 1", "stvar i", "ldc_i4 10", "stloc $for"]);
    assert_in_order(&text, &["while", "ldvar i", "ldloc $for", "cgt", "do"]);
}

#[test]
fn case_statement_lowers_to_switch() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; VAR i, r: INT32;\n\
         BEGIN\n\
           CASE i OF\n\
             0, 2..3: r := 1\n\
           | 5: r := 2\n\
           ELSE r := 3\n\
           END\n\
         END M.",
    )]);
    assert_clean(&compiler);
    let text = ir_text(&compiler);
    assert_in_order(&text, &["switch", "case 0 2 3", "case 5", "else", "end"]);
}

#[test]
fn duplicate_case_labels_are_rejected() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; VAR i: INT32; BEGIN CASE i OF 1: | 1..2: END END M.",
    )]);
    assert!(compiler.session.diags.has_errors());
}

#[test]
fn new_and_dispose_lowerings() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M;\n\
         TYPE R = RECORD x: INT32 END; A = ARRAY OF INT32;\n\
         VAR p: POINTER TO R; q: POINTER TO A;\n\
         BEGIN NEW(p); NEW(q, 16); DISPOSE(p) END M.",
    )]);
    assert_clean(&compiler);
    let text = ir_text(&compiler);
    assert_in_order(&text, &["ldvaraddr p", "newobj R", "stind IntPtr"]);
    assert_in_order(&text, &["ldvaraddr q", "ldc_i4 16", "newarr int32", "stind IntPtr"]);
    assert_in_order(&text, &["ldvar p", "free"]);
}

#[test]
fn assertion_gets_line_and_file() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; VAR b: BOOL; BEGIN ASSERT(b) END M.",
    )]);
    assert_clean(&compiler);
    let text = ir_text(&compiler);
    assert_in_order(&text, &["ldvar b", "ldc_i4 1", "ldstr", "call $MIC.assert"]);
}

#[test]
fn goto_into_nested_block_is_rejected() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; VAR i: INT32;\n\
         BEGIN\n\
           GOTO inner;\n\
           IF i = 0 THEN inner: i := 1 END\n\
         END M.",
    )]);
    assert!(compiler.session.diags.has_errors());
    assert!(compiler
        .session
        .diags
        .iter()
        .any(|d| d.message.contains("nested block")));
}

#[test]
fn goto_to_sibling_label_is_accepted() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; VAR i: INT32;\n\
         BEGIN\n\
           again: i := i + 1;\n\
           GOTO again\n\
         END M.",
    )]);
    assert_clean(&compiler);
    let text = ir_text(&compiler);
    assert_in_order(&text, &["label again", "goto again"]);
}

#[test]
fn mixed_signedness_is_diagnosed() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; VAR a: INT32; b: UINT32; c: INT32; BEGIN c := a + b END M.",
    )]);
    assert!(compiler.session.diags.has_errors());
    assert!(compiler
        .session
        .diags
        .iter()
        .any(|d| d.message.contains("signed")));
}

#[test]
fn string_literal_fits_char_array() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M; VAR s: ARRAY 8 OF CHAR; BEGIN s := \"hello\" END M.",
    )]);
    assert_clean(&compiler);

    let (overflow, _dir2) = compile(&[(
        "M.mic",
        "MODULE M; VAR s: ARRAY 4 OF CHAR; BEGIN s := \"hello\" END M.",
    )]);
    assert!(overflow.session.diags.has_errors());
}

#[test]
fn error_recovery_reports_multiple_errors() {
    let (compiler, _dir) = compile(&[(
        "M.mic",
        "MODULE M;\n\
         VAR x: Unknown1;\n\
         VAR y: Unknown2;\n\
         END M.",
    )]);
    assert!(compiler.session.diags.error_count() >= 2);
}
