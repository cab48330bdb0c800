use lasso::{Spur, ThreadedRodeo};
use std::num::NonZeroU32;

/// Interned string handle. All class, member and descriptor names travel as
/// symbols; the interner lives on the `VirtualMachine`.
pub type Symbol = Spur;

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU32);

        impl $name {
            pub fn new(raw: NonZeroU32) -> Self {
                Self(raw)
            }

            /// Builds an id from a one-based position, i.e. the arena length
            /// right after the push.
            pub fn from_usize(one_based: usize) -> Self {
                Self(NonZeroU32::new(one_based as u32).expect("arena ids are one-based"))
            }

            pub fn to_index(self) -> usize {
                self.0.get() as usize - 1
            }

            pub fn into_inner(self) -> NonZeroU32 {
                self.0
            }
        }
    };
}

arena_id!(
    /// Index into the method area's class arena.
    ClassId
);
arena_id!(
    /// Index into the method area's method arena.
    MethodId
);
arena_id!(
    /// Index into the method area's field-descriptor arena.
    FieldDescriptorId
);
arena_id!(
    /// Index into the method area's method-descriptor arena.
    MethodDescriptorId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u32);

impl ThreadId {
    pub fn from_usize(v: usize) -> Self {
        ThreadId(v as u32)
    }
}

/// Name + descriptor pair identifying a field within a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldKey {
    pub name: Symbol,
    pub desc: Symbol,
}

/// Name + descriptor pair identifying a method within a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub name: Symbol,
    pub desc: Symbol,
}

/// Method key qualified by its holder. `class == None` addresses the
/// array pseudo-class receiver used by natives such as `Object.clone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullyQualifiedMethodKey {
    pub class: Option<Symbol>,
    pub name: Symbol,
    pub desc: Symbol,
}

impl FullyQualifiedMethodKey {
    pub fn new(class: Symbol, name: Symbol, desc: Symbol) -> Self {
        FullyQualifiedMethodKey {
            class: Some(class),
            name,
            desc,
        }
    }

    pub fn new_with_str(class: &str, name: &str, desc: &str, interner: &ThreadedRodeo) -> Self {
        FullyQualifiedMethodKey {
            class: Some(interner.get_or_intern(class)),
            name: interner.get_or_intern(name),
            desc: interner.get_or_intern(desc),
        }
    }
}
