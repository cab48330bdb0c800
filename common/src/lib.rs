//! Support types shared by the class-file parser and the runtime: a
//! bounds-checked big-endian cursor, JVM type kinds, descriptor parsing,
//! the canonical bytecode instruction model, wide-string primitives and the
//! compressed bitset used by the liveness analysis and the collector.

pub mod bitset;
pub mod cursor;
pub mod descriptor;
pub mod instruction;
pub mod jtype;
pub mod wmap;
pub mod wstr;
