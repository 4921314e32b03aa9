//! Canonical type system.
//!
//! Arithmetic, pointer, array, and function types are plain structural
//! values and compare with derived `PartialEq`. Struct/union types are
//! referenced by identity (`Rc<RefCell<RecordBody>>`) keyed at their
//! tag-definition site, so promoting an incomplete struct to a complete
//! one is visible through every clone of the reference (spec.md 4.4,
//! 9 "Type interning").

use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntKind {
    Bool,
    Char,
    Short,
    Int,
    Long,
}

impl IntKind {
    pub fn size(self) -> usize {
        match self {
            IntKind::Bool | IntKind::Char => 1,
            IntKind::Short => 2,
            IntKind::Int => 4,
            IntKind::Long => 8,
        }
    }

    /// Integer conversion rank; wider ranks never lose information of
    /// narrower ones. Used by the usual arithmetic conversions.
    pub fn rank(self) -> u8 {
        match self {
            IntKind::Bool => 0,
            IntKind::Char => 1,
            IntKind::Short => 2,
            IntKind::Int => 3,
            IntKind::Long => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Arith {
    pub kind: IntKind,
    pub unsigned: bool,
}

impl Arith {
    pub const fn new(kind: IntKind, unsigned: bool) -> Self {
        Arith { kind, unsigned }
    }

    pub const fn int() -> Self {
        Arith::new(IntKind::Int, false)
    }

    pub const fn uint() -> Self {
        Arith::new(IntKind::Int, true)
    }

    pub const fn long() -> Self {
        Arith::new(IntKind::Long, false)
    }

    pub const fn ulong() -> Self {
        Arith::new(IntKind::Long, true)
    }

    pub const fn char_() -> Self {
        // plain `char` is signed per spec.md 3.
        Arith::new(IntKind::Char, false)
    }

    pub fn size(self) -> usize {
        self.kind.size()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Qualifiers {
    pub is_const: bool,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub ty: Type,
    pub offset: usize,
}

/// The body of a struct or union, identified by the `Rc` that wraps it.
/// `members = None` means the tag is declared but not yet completed.
#[derive(Debug)]
pub struct RecordBody {
    pub tag: Option<String>,
    pub is_union: bool,
    pub members: Option<Vec<Member>>,
    pub size: Option<usize>,
    pub align: Option<usize>,
}

pub type RecordRef = Rc<RefCell<RecordBody>>;

#[derive(Debug, Clone)]
pub enum Type {
    Void,
    Arith(Arith),
    Pointer(Box<Type>),
    /// `Array(element, Some(n))` is complete; `Array(element, None)` is
    /// incomplete and is compatible with any completed array of the
    /// same element type (spec.md 3).
    Array(Box<Type>, Option<usize>),
    Function {
        ret: Box<Type>,
        params: Vec<Type>,
        has_prototype: bool,
    },
    Record(RecordRef),
    Qualified(Box<Type>, Qualifiers),
    /// Produced once for an already-diagnosed expression so downstream
    /// rules see a type instead of re-diagnosing (spec.md 4.5, 9).
    Error,
}

impl Type {
    pub fn record(tag: Option<String>, is_union: bool) -> Type {
        Type::Record(Rc::new(RefCell::new(RecordBody {
            tag,
            is_union,
            members: None,
            size: None,
            align: None,
        })))
    }

    pub fn pointer_to(self) -> Type {
        Type::Pointer(Box::new(self))
    }

    pub fn qualify_const(self) -> Type {
        match self {
            Type::Qualified(inner, mut q) => {
                q.is_const = true;
                Type::Qualified(inner, q)
            }
            other => Type::Qualified(Box::new(other), Qualifiers { is_const: true }),
        }
    }

    /// Strip qualifiers, exposing the underlying shape.
    pub fn unqualified(&self) -> &Type {
        match self {
            Type::Qualified(inner, _) => inner.unqualified(),
            other => other,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Type::Qualified(_, q) if q.is_const)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.unqualified(), Type::Error)
    }

    pub fn is_void(&self) -> bool {
        matches!(self.unqualified(), Type::Void)
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(self.unqualified(), Type::Arith(_))
    }

    pub fn is_integer(&self) -> bool {
        self.is_arithmetic()
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.unqualified(), Type::Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.unqualified(), Type::Array(..))
    }

    pub fn is_function(&self) -> bool {
        matches!(self.unqualified(), Type::Function { .. })
    }

    pub fn is_record(&self) -> bool {
        matches!(self.unqualified(), Type::Record(_))
    }

    pub fn is_scalar(&self) -> bool {
        self.is_arithmetic() || self.is_pointer()
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self.unqualified() {
            Type::Pointer(inner) => Some(inner),
            Type::Array(inner, _) => Some(inner),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&RecordRef> {
        match self.unqualified() {
            Type::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_arith(&self) -> Option<Arith> {
        match self.unqualified() {
            Type::Arith(a) => Some(*a),
            _ => None,
        }
    }

    /// Array-to-pointer and function-to-pointer decay, applied in value
    /// contexts (spec.md 4.4). Qualifiers on the decayed-from type are
    /// dropped, matching the rest of the compatibility rules.
    pub fn decay(&self) -> Type {
        match self.unqualified() {
            Type::Array(elem, _) => Type::Pointer(elem.clone()),
            Type::Function { .. } => Type::Pointer(Box::new(self.unqualified().clone())),
            other => other.clone(),
        }
    }

    /// Size in bytes, if the type is complete.
    pub fn size_of(&self) -> Option<usize> {
        match self.unqualified() {
            Type::Void => None,
            Type::Arith(a) => Some(a.size()),
            Type::Pointer(_) => Some(8),
            Type::Array(elem, Some(n)) => elem.size_of().map(|s| s * n),
            Type::Array(_, None) => None,
            Type::Function { .. } => None,
            Type::Record(r) => r.borrow().size,
            Type::Qualified(..) => unreachable!("unqualified() strips Qualified"),
            Type::Error => Some(0),
        }
    }

    pub fn align_of(&self) -> Option<usize> {
        match self.unqualified() {
            Type::Void => None,
            Type::Arith(a) => Some(a.size()),
            Type::Pointer(_) => Some(8),
            Type::Array(elem, _) => elem.align_of(),
            Type::Function { .. } => None,
            Type::Record(r) => r.borrow().align,
            Type::Qualified(..) => unreachable!(),
            Type::Error => Some(1),
        }
    }

    pub fn is_complete(&self) -> bool {
        if self.is_error() {
            return true;
        }
        self.size_of().is_some() && !self.is_void()
    }

    pub fn is_null_pointer_constant_type(&self, value: Option<i128>) -> bool {
        self.is_integer() && value == Some(0)
    }
}

impl PartialEq for Type {
    /// Structural equality of the *canonical shape*, ignoring
    /// qualifiers (qualifiers matter for assignability, not identity).
    /// Two record types are equal only if they share the same `Rc`
    /// (the tag-definition site), per spec.md 9.
    fn eq(&self, other: &Self) -> bool {
        match (self.unqualified(), other.unqualified()) {
            (Type::Void, Type::Void) => true,
            (Type::Arith(a), Type::Arith(b)) => a == b,
            (Type::Pointer(a), Type::Pointer(b)) => a == b,
            (Type::Array(a, sa), Type::Array(b, sb)) => a == b && sa == sb,
            (
                Type::Function {
                    ret: ra,
                    params: pa,
                    has_prototype: hpa,
                },
                Type::Function {
                    ret: rb,
                    params: pb,
                    has_prototype: hpb,
                },
            ) => ra == rb && pa == pb && hpa == hpb,
            (Type::Record(a), Type::Record(b)) => Rc::ptr_eq(a, b),
            (Type::Error, Type::Error) => true,
            _ => false,
        }
    }
}

/// Type compatibility per spec.md 4.4. This is intentionally more
/// permissive than `PartialEq` for arrays (incomplete vs. complete) and
/// for `void*`; callers that need exact identity use `==`.
pub fn compatible(a: &Type, b: &Type) -> bool {
    if a.is_error() || b.is_error() {
        return true;
    }
    match (a.unqualified(), b.unqualified()) {
        (Type::Array(ea, na), Type::Array(eb, nb)) => {
            compatible(ea, eb)
                && match (na, nb) {
                    (Some(x), Some(y)) => x == y,
                    _ => true, // incomplete is compatible with any length
                }
        }
        (Type::Pointer(_), Type::Pointer(_)) if a.is_void_pointer() || b.is_void_pointer() => true,
        (Type::Pointer(pa), Type::Pointer(pb)) => compatible(pa, pb),
        (
            Type::Function {
                ret: ra,
                params: pa,
                has_prototype: hpa,
            },
            Type::Function {
                ret: rb,
                params: pb,
                has_prototype: hpb,
            },
        ) => {
            compatible(ra, rb)
                && (!hpa || !hpb || (pa.len() == pb.len() && pa.iter().zip(pb).all(|(x, y)| compatible(x, y))))
        }
        _ => a == b,
    }
}

impl Type {
    pub fn is_void_pointer(&self) -> bool {
        matches!(self.pointee(), Some(t) if t.is_void())
    }
}

/// Compute natural-alignment offsets and total (padded) size for an
/// ordered member list, per spec.md 3/8: offsets satisfy natural
/// alignment, trailing padding rounds the total up to the struct
/// alignment.
pub fn layout_struct(fields: Vec<(String, Type)>) -> (Vec<Member>, usize, usize) {
    let mut members = Vec::with_capacity(fields.len());
    let mut offset = 0usize;
    let mut max_align = 1usize;
    for (name, ty) in fields {
        let align = ty.align_of().unwrap_or(1);
        max_align = max_align.max(align);
        offset = round_up(offset, align);
        let size = ty.size_of().unwrap_or(0);
        members.push(Member {
            name,
            ty,
            offset,
        });
        offset += size;
    }
    let size = round_up(offset, max_align);
    (members, size, max_align)
}

/// Union layout: every member shares offset 0, size is the max member
/// size rounded up to the max member alignment.
pub fn layout_union(fields: Vec<(String, Type)>) -> (Vec<Member>, usize, usize) {
    let mut members = Vec::with_capacity(fields.len());
    let mut max_size = 0usize;
    let mut max_align = 1usize;
    for (name, ty) in fields {
        max_align = max_align.max(ty.align_of().unwrap_or(1));
        max_size = max_size.max(ty.size_of().unwrap_or(0));
        members.push(Member {
            name,
            ty,
            offset: 0,
        });
    }
    let size = round_up(max_size, max_align);
    (members, size, max_align)
}

fn round_up(value: usize, align: usize) -> usize {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

/// Integer promotion: `_Bool`/`char`/`short` (signed or unsigned) become
/// `int` (spec.md glossary). `int`/`long` pass through unchanged.
pub fn integer_promote(a: Arith) -> Arith {
    if a.kind.rank() < IntKind::Int.rank() {
        Arith::int()
    } else {
        a
    }
}

/// The usual arithmetic conversions' common type (spec.md 4.5): promote
/// both operands, then if ranks differ take the wider; on a tie prefer
/// unsigned if either operand is unsigned.
pub fn usual_arithmetic_conversion(a: Arith, b: Arith) -> Arith {
    let a = integer_promote(a);
    let b = integer_promote(b);
    if a.kind.rank() == b.kind.rank() {
        Arith::new(a.kind, a.unsigned || b.unsigned)
    } else if a.kind.rank() > b.kind.rank() {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_array_compatible_with_complete() {
        let incomplete = Type::Array(Box::new(Type::Arith(Arith::int())), None);
        let complete = Type::Array(Box::new(Type::Arith(Arith::int())), Some(3));
        assert!(compatible(&incomplete, &complete));
    }

    #[test]
    fn struct_identity_survives_completion() {
        let r = Type::record(Some("Point".into()), false);
        let r2 = r.clone();
        if let Type::Record(rc) = &r2 {
            let (members, size, align) = layout_struct(vec![
                ("x".into(), Type::Arith(Arith::int())),
                ("y".into(), Type::Arith(Arith::int())),
            ]);
            rc.borrow_mut().members = Some(members);
            rc.borrow_mut().size = Some(size);
            rc.borrow_mut().align = Some(align);
        }
        assert!(r.is_complete());
        assert_eq!(r.size_of(), Some(8));
    }

    #[test]
    fn usual_arithmetic_conversion_prefers_unsigned_on_tie() {
        let common = usual_arithmetic_conversion(Arith::new(IntKind::Int, false), Arith::uint());
        assert_eq!(common, Arith::uint());
    }

    #[test]
    fn layout_pads_to_struct_alignment() {
        let (members, size, align) = layout_struct(vec![
            ("a".into(), Type::Arith(Arith::char_())),
            ("b".into(), Type::Arith(Arith::long())),
        ]);
        assert_eq!(members[0].offset, 0);
        assert_eq!(members[1].offset, 8); // padded up to long's alignment
        assert_eq!(size, 16);
        assert_eq!(align, 8);
    }

    #[test]
    fn void_pointer_compatible_with_any_object_pointer() {
        let void_ptr = Type::Pointer(Box::new(Type::Void));
        let int_ptr = Type::Pointer(Box::new(Type::Arith(Arith::int())));
        assert!(compatible(&void_ptr, &int_ptr));
    }
}
