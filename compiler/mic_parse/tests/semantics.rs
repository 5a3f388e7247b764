//! Semantic-layer tests: promotion, folding, assignability and builtin
//! checking, driven through the parser on single-module sources with no
//! importer attached.

use mic_diagnostic::DiagnosticKind;
use mic_lexer::TokenStream;
use mic_mil::{IlAsmRenderer, InMemRenderer, MilModule};
use mic_parse::{Parser, Session};

fn analyse(source: &str) -> (Session, Vec<MilModule>) {
    let mut session = Session::new();
    let mut scanner = TokenStream::from_source(
        source,
        "test.mic",
        &session.symbols,
        &mut session.diags,
    );
    let mut renderer = InMemRenderer::new();
    {
        let parser = Parser::new(&mut session, &mut scanner, &mut renderer, None);
        parser.run(Vec::new(), "");
    }
    (session, renderer.take_modules())
}

fn text(modules: &[MilModule]) -> String {
    let mut r = IlAsmRenderer::new(Vec::new());
    for m in modules {
        m.render(&mut r);
    }
    String::from_utf8(r.into_inner()).unwrap()
}

fn assert_clean(session: &Session) {
    let msgs: Vec<String> = session.diags.iter().map(|d| d.to_string()).collect();
    assert!(!session.diags.has_errors(), "unexpected diagnostics: {msgs:?}");
}

#[test]
fn integer_promotion_is_order_independent() {
    let (s1, _) = analyse(
        "MODULE M; VAR a: INT8; b: INT16; c: INT32; BEGIN c := a + b END M.",
    );
    assert_clean(&s1);
    let (s2, _) = analyse(
        "MODULE M; VAR a: INT8; b: INT16; c: INT32; BEGIN c := b + a END M.",
    );
    assert_clean(&s2);
}

#[test]
fn narrow_unsigned_operands_widen_to_32_bits() {
    let (session, modules) = analyse(
        "MODULE M; VAR a: UINT8; c: UINT32; BEGIN c := a + a END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    assert!(out.contains("conv U4"), "IR was:\n{out}");
}

#[test]
fn reals_absorb_integer_operands() {
    let (session, modules) = analyse(
        "MODULE M; VAR r: FLOAT64; i: INT32; BEGIN r := r + i END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    assert!(out.contains("conv R8"), "IR was:\n{out}");
}

#[test]
fn shift_width_follows_left_operand() {
    let (session, modules) = analyse(
        "MODULE M; VAR a: UINT64; c: UINT64; BEGIN c := BITSHL(a, 0x1) END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    assert!(out.contains("shl"), "IR was:\n{out}");
}

#[test]
fn constant_bit_arithmetic_folds_by_width() {
    let (session, modules) = analyse(
        "MODULE M; CONST x = BITXOR(0xFF, 0x0F); END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    assert!(out.contains("const x: uint32 = 240"), "IR was:\n{out}");
}

#[test]
fn size_and_bits_fold() {
    let (session, modules) = analyse(
        "MODULE M; CONST s = SIZE(INT64); b = BITS(UINT16); END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    assert!(out.contains("const s: uint32 = 8"), "IR was:\n{out}");
    assert!(out.contains("const b: uint32 = 16"), "IR was:\n{out}");
}

#[test]
fn odd_and_abs_fold() {
    let (session, modules) = analyse(
        "MODULE M; CONST o = ODD(3); a = ABS(-5); END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    assert!(out.contains("const o: bool = true"), "IR was:\n{out}");
    assert!(out.contains("const a: int32 = 5"), "IR was:\n{out}");
}

#[test]
fn chr_and_ord_convert() {
    let (session, modules) = analyse(
        "MODULE M; VAR c: CHAR; i: INT32;\n\
         BEGIN c := CHR(i); i := ORD(c) END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    assert!(out.contains("conv U1"), "IR was:\n{out}");
    assert!(out.contains("conv I4"), "IR was:\n{out}");
}

#[test]
fn cast_is_width_checked_reinterpretation() {
    let (session, _) = analyse(
        "MODULE M; VAR s: SET; u: UINT32; BEGIN s := CAST(u, SET) END M.",
    );
    assert_clean(&session);

    let (bad, _) = analyse(
        "MODULE M; VAR u: UINT8; i: INT64; BEGIN i := CAST(u, INT64) END M.",
    );
    assert!(bad.diags.has_errors());
}

#[test]
fn builtin_arity_is_checked() {
    let (session, _) = analyse("MODULE M; BEGIN PRINTLN(1, 2) END M.");
    assert!(session.diags.has_errors());
    let first = session.diags.iter().next().unwrap();
    assert_eq!(first.kind, DiagnosticKind::Type);
}

#[test]
fn inc_rejects_enum_step() {
    let (session, _) = analyse(
        "MODULE M; TYPE Color = (red, green, blue); VAR c: Color;\n\
         BEGIN INC(c, 2) END M.",
    );
    assert!(session.diags.has_errors());
    assert!(session
        .diags
        .iter()
        .any(|d| d.message.contains("enumeration")));
}

#[test]
fn enum_members_fold_and_print_via_int() {
    let (session, modules) = analyse(
        "MODULE M; TYPE Color = (red, green, blue); CONST g = green;\n\
         VAR c: Color; BEGIN c := blue; PRINT(c) END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    assert!(out.contains("const g: Color = 1"), "IR was:\n{out}");
    assert!(out.contains("call $MIC.printI8"), "IR was:\n{out}");
}

#[test]
fn set_constructor_and_membership() {
    let (session, modules) = analyse(
        "MODULE M; CONST s = {0, 2..4}; VAR b: BOOL; BEGIN b := 3 IN s END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    assert!(out.contains("const s: set = 29"), "IR was:\n{out}");
}

#[test]
fn incl_excl_lowering() {
    let (session, modules) = analyse(
        "MODULE M; VAR s: SET; i: UINT32; BEGIN INCL(s, 3); EXCL(s, i) END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    assert!(out.contains("ldind U4"), "IR was:\n{out}");
    assert!(out.contains("not"), "IR was:\n{out}");
}

#[test]
fn nil_and_pointer_assignability() {
    let (session, _) = analyse(
        "MODULE M; TYPE R = RECORD x: INT32 END;\n\
         VAR p, q: POINTER TO R;\n\
         BEGIN p := NIL; q := p END M.",
    );
    // p and q share the same anonymous pointer type declaration
    assert_clean(&session);
}

#[test]
fn proc_values_match_structurally() {
    let (session, modules) = analyse(
        "MODULE M;\n\
         TYPE H = PROC(INT32): INT32;\n\
         VAR h: H;\n\
         PROCEDURE double(x: INT32): INT32; BEGIN RETURN x + x END double;\n\
         BEGIN h := double; h(21) END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    assert!(out.contains("ldproc double"), "IR was:\n{out}");
    assert!(out.contains("calli 1"), "IR was:\n{out}");
}

#[test]
fn var_params_pass_addresses() {
    let (session, modules) = analyse(
        "MODULE M;\n\
         PROCEDURE bump(VAR x: INT32); BEGIN x := x + 1 END bump;\n\
         VAR n: INT32;\n\
         BEGIN bump(n) END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    assert!(out.contains("ldvaraddr n"), "IR was:\n{out}");
    // inside the body: read through the address, store through it
    assert!(out.contains("ldarg x"), "IR was:\n{out}");
    assert!(out.contains("stind I4"), "IR was:\n{out}");
}

#[test]
fn nested_procedures_flatten_names() {
    let (session, modules) = analyse(
        "MODULE M;\n\
         PROCEDURE outer();\n\
           PROCEDURE inner(); BEGIN END inner;\n\
         BEGIN inner() END outer;\n\
         END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    assert!(out.contains("proc outer$inner"), "IR was:\n{out}");
    assert!(out.contains("call outer$inner"), "IR was:\n{out}");
}

#[test]
fn short_circuit_boolean_operators() {
    let (session, modules) = analyse(
        "MODULE M; VAR a, b, c: BOOL; BEGIN c := a & b; c := a OR b END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    // both operators lower to value-producing if blocks
    assert!(out.matches("if").count() >= 2, "IR was:\n{out}");
}

#[test]
fn assignment_narrowing_requires_same_class() {
    let (ok, modules) = analyse(
        "MODULE M; VAR a: UINT8; b: UINT32; BEGIN a := BITAND(b, 0xFF) END M.",
    );
    assert_clean(&ok);
    let out = text(&modules);
    assert!(out.contains("conv U1"), "IR was:\n{out}");

    let (bad, _) = analyse("MODULE M; VAR a: UINT8; i: INT32; BEGIN a := i END M.");
    assert!(bad.diags.has_errors());
}

#[test]
fn default_and_min_max_fold() {
    let (session, modules) = analyse(
        "MODULE M; CONST d = DEFAULT(INT32); lo = MIN(INT8); hi = MAX(UINT16);\n\
         m = MAX(3, 7); END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    assert!(out.contains("const d: int32 = 0"), "IR was:\n{out}");
    assert!(out.contains("const lo: int8 = -128"), "IR was:\n{out}");
    assert!(out.contains("const hi: uint16 = 65535"), "IR was:\n{out}");
    assert!(out.contains("const m: int32 = 7"), "IR was:\n{out}");
}

#[test]
fn strings_reach_const_items() {
    let (session, modules) = analyse(
        "MODULE M; CONST greeting = \"hello\"; n = STRLEN(\"hello\"); END M.",
    );
    assert_clean(&session);
    let out = text(&modules);
    assert!(out.contains("const greeting: str = \"hello\""), "IR was:\n{out}");
    assert!(out.contains("const n: uint32 = 5"), "IR was:\n{out}");
}
