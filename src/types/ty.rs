//! The semantic type universe and its assignability rules.

use std::fmt;
use std::rc::Rc;

/// A fully resolved semantic type.
///
/// `IntLit` exists only inside the type checker: it is the type of an
/// integer literal, carrying the literal's mathematical value, before a use
/// site forces a concrete width.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ty {
  I64,
  U64,
  U8,
  Bool,
  Unit,
  /// The type of the `null` literal; inhabits every pointer type.
  Null,
  IntLit(i128),
  Ptr(Rc<Ty>),
  Struct(Rc<str>),
}

impl Ty {
  /// Integer classification; literal types count as integers.
  #[must_use] pub fn is_int(&self) -> bool {
    matches!(self, Ty::I64 | Ty::U64 | Ty::U8 | Ty::IntLit(_))
  }

  #[must_use] pub fn is_bool(&self) -> bool { matches!(self, Ty::Bool) }

  #[must_use] pub fn is_ptr(&self) -> bool { matches!(self, Ty::Ptr(_)) }

  /// Whether a literal with mathematical value `v` fits this type's range.
  /// `false` for every non-concrete-integer target.
  #[must_use] pub fn fits_literal(&self, v: i128) -> bool {
    match self {
      Ty::I64 => i128::from(i64::MIN) <= v && v <= i128::from(i64::MAX),
      Ty::U64 => 0 <= v && v <= i128::from(u64::MAX),
      Ty::U8 => 0 <= v && v <= i128::from(u8::MAX),
      _ => false,
    }
  }
}

/// Whether a value of type `value` may be stored into a location of type
/// `target`: identical types, `null` into any pointer, or a literal that
/// fits the target's integer range.
#[must_use] pub fn is_assignable(target: &Ty, value: &Ty) -> bool {
  match value {
    Ty::IntLit(v) if target.is_int() => target.fits_literal(*v),
    Ty::Null if target.is_ptr() => true,
    _ => target == value,
  }
}

impl fmt::Display for Ty {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Ty::I64 => write!(f, "i64"),
      Ty::U64 => write!(f, "u64"),
      Ty::U8 => write!(f, "u8"),
      Ty::Bool => write!(f, "bool"),
      Ty::Unit => write!(f, "unit"),
      Ty::Null => write!(f, "null"),
      Ty::IntLit(_) => write!(f, "integer literal"),
      Ty::Ptr(inner) => write!(f, "*{inner}"),
      Ty::Struct(name) => write!(f, "{name}"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn literal_ranges() {
    assert!(Ty::I64.fits_literal(i128::from(i64::MAX)));
    assert!(!Ty::I64.fits_literal(i128::from(i64::MAX) + 1));
    assert!(Ty::U64.fits_literal(i128::from(u64::MAX)));
    assert!(!Ty::U64.fits_literal(-1));
    assert!(Ty::U8.fits_literal(255));
    assert!(!Ty::U8.fits_literal(256));
  }

  #[test]
  fn null_inhabits_pointers_only() {
    let p = Ty::Ptr(Rc::new(Ty::I64));
    assert!(is_assignable(&p, &Ty::Null));
    assert!(!is_assignable(&Ty::I64, &Ty::Null));
    assert!(!is_assignable(&Ty::Bool, &Ty::Null));
  }

  #[test]
  fn assignability_is_exact_for_concrete_types() {
    assert!(is_assignable(&Ty::I64, &Ty::I64));
    assert!(!is_assignable(&Ty::I64, &Ty::U64));
    let pi = Ty::Ptr(Rc::new(Ty::I64));
    let pu = Ty::Ptr(Rc::new(Ty::U64));
    assert!(!is_assignable(&pi, &pu));
  }
}
