//! Stack headroom for deep recursion.
//!
//! Micron expressions recurse twice: once in the descent through
//! `factor`/`term`/`SimpleExpression`, and again when the evaluator
//! walks the finished tree to fold and emit. Both walks guard their
//! entry points here, so a pathologically parenthesised source grows
//! the stack instead of overflowing it.
//!
//! The numbers are sized to those two walks: a parser or evaluator
//! frame plus the helper calls between two guarded entries stays well
//! under a kilobyte, so a 64KB red zone leaves a wide margin, and
//! half-megabyte segments (several hundred further nesting levels
//! each) keep segment switching rare.

const RED_ZONE: usize = 64 * 1024;
const GROW_BY: usize = 512 * 1024;

/// Run `f`, moving to a bigger stack segment first if the remaining
/// headroom is inside the red zone.
#[inline]
pub fn grow<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, GROW_BY, f)
}
