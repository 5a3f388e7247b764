//! The closed set of built-in functions and procedures.

/// Built-in identifier codes. Functions first, then proper procedures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Builtin {
    // functions
    Abs,
    Cap,
    BitAnd,
    BitAsr,
    BitNot,
    BitOr,
    Bits,
    BitShl,
    BitShr,
    BitXor,
    Cast,
    Chr,
    Default,
    Floor,
    Flt,
    Getenv,
    Len,
    Long,
    Max,
    Min,
    Odd,
    Ord,
    Short,
    Signed,
    Size,
    Strlen,
    Unsigned,
    Vararg,
    Varargs,
    // procedures
    Assert,
    Dec,
    Dispose,
    Excl,
    Halt,
    Inc,
    Incl,
    New,
    Pcall,
    Print,
    Println,
    Raise,
    Setenv,
}

impl Builtin {
    /// All builtins, used to seed the global scope.
    pub const ALL: &'static [Builtin] = &[
        Builtin::Abs,
        Builtin::Cap,
        Builtin::BitAnd,
        Builtin::BitAsr,
        Builtin::BitNot,
        Builtin::BitOr,
        Builtin::Bits,
        Builtin::BitShl,
        Builtin::BitShr,
        Builtin::BitXor,
        Builtin::Cast,
        Builtin::Chr,
        Builtin::Default,
        Builtin::Floor,
        Builtin::Flt,
        Builtin::Getenv,
        Builtin::Len,
        Builtin::Long,
        Builtin::Max,
        Builtin::Min,
        Builtin::Odd,
        Builtin::Ord,
        Builtin::Short,
        Builtin::Signed,
        Builtin::Size,
        Builtin::Strlen,
        Builtin::Unsigned,
        Builtin::Vararg,
        Builtin::Varargs,
        Builtin::Assert,
        Builtin::Dec,
        Builtin::Dispose,
        Builtin::Excl,
        Builtin::Halt,
        Builtin::Inc,
        Builtin::Incl,
        Builtin::New,
        Builtin::Pcall,
        Builtin::Print,
        Builtin::Println,
        Builtin::Raise,
        Builtin::Setenv,
    ];

    /// Source-level name.
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Abs => "ABS",
            Builtin::Cap => "CAP",
            Builtin::BitAnd => "BITAND",
            Builtin::BitAsr => "BITASR",
            Builtin::BitNot => "BITNOT",
            Builtin::BitOr => "BITOR",
            Builtin::Bits => "BITS",
            Builtin::BitShl => "BITSHL",
            Builtin::BitShr => "BITSHR",
            Builtin::BitXor => "BITXOR",
            Builtin::Cast => "CAST",
            Builtin::Chr => "CHR",
            Builtin::Default => "DEFAULT",
            Builtin::Floor => "FLOOR",
            Builtin::Flt => "FLT",
            Builtin::Getenv => "GETENV",
            Builtin::Len => "LEN",
            Builtin::Long => "LONG",
            Builtin::Max => "MAX",
            Builtin::Min => "MIN",
            Builtin::Odd => "ODD",
            Builtin::Ord => "ORD",
            Builtin::Short => "SHORT",
            Builtin::Signed => "SIGNED",
            Builtin::Size => "SIZE",
            Builtin::Strlen => "STRLEN",
            Builtin::Unsigned => "UNSIGNED",
            Builtin::Vararg => "VARARG",
            Builtin::Varargs => "VARARGS",
            Builtin::Assert => "ASSERT",
            Builtin::Dec => "DEC",
            Builtin::Dispose => "DISPOSE",
            Builtin::Excl => "EXCL",
            Builtin::Halt => "HALT",
            Builtin::Inc => "INC",
            Builtin::Incl => "INCL",
            Builtin::New => "NEW",
            Builtin::Pcall => "PCALL",
            Builtin::Print => "PRINT",
            Builtin::Println => "PRINTLN",
            Builtin::Raise => "RAISE",
            Builtin::Setenv => "SETENV",
        }
    }

    /// Whether a call may fold to a constant when its arguments are
    /// constants. Type-based builtins (LEN, SIZE, BITS, DEFAULT) have
    /// their own rules in `AstModel::is_const_expr`.
    pub fn may_fold(self) -> bool {
        matches!(
            self,
            Builtin::Abs
                | Builtin::Cap
                | Builtin::BitAnd
                | Builtin::BitAsr
                | Builtin::BitNot
                | Builtin::BitOr
                | Builtin::Bits
                | Builtin::BitShl
                | Builtin::BitShr
                | Builtin::BitXor
                | Builtin::Cast
                | Builtin::Chr
                | Builtin::Default
                | Builtin::Floor
                | Builtin::Flt
                | Builtin::Len
                | Builtin::Long
                | Builtin::Max
                | Builtin::Min
                | Builtin::Odd
                | Builtin::Ord
                | Builtin::Short
                | Builtin::Signed
                | Builtin::Size
                | Builtin::Strlen
                | Builtin::Unsigned
        )
    }

    /// Whether the builtin is a proper procedure (no result value).
    pub fn is_procedure(self) -> bool {
        matches!(
            self,
            Builtin::Assert
                | Builtin::Dec
                | Builtin::Dispose
                | Builtin::Excl
                | Builtin::Halt
                | Builtin::Inc
                | Builtin::Incl
                | Builtin::New
                | Builtin::Pcall
                | Builtin::Print
                | Builtin::Println
                | Builtin::Raise
                | Builtin::Setenv
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_names_distinct() {
        let mut names: Vec<_> = Builtin::ALL.iter().map(|b| b.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Builtin::ALL.len());
    }

    #[test]
    fn test_procedure_split() {
        assert!(Builtin::Println.is_procedure());
        assert!(!Builtin::Len.is_procedure());
    }
}
