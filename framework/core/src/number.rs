use core::fmt;

/// A dynamically-typed numeric value produced by the DBC signal codec.
///
/// Grounded in the original `dbcNumber` tagged union (signed/unsigned/double,
/// plus an explicit "none" state for values that haven't been set yet).
/// Arithmetic preserves the widest operand kind: mixing a `Real` into an
/// expression always yields a `Real`; mixing `Signed`/`Unsigned` widens to
/// `Signed` so a negative intermediate isn't silently reinterpreted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Undefined,
    Signed(i32),
    Unsigned(u32),
    Real(f64),
}

impl Default for Number {
    fn default() -> Self {
        Number::Undefined
    }
}

impl Number {
    pub fn is_defined(&self) -> bool {
        !matches!(self, Number::Undefined)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Number::Undefined => None,
            Number::Signed(v) => Some(*v as f64),
            Number::Unsigned(v) => Some(*v as f64),
            Number::Real(v) => Some(*v),
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Number::Undefined => None,
            Number::Signed(v) => Some(*v),
            Number::Unsigned(v) => i32::try_from(*v).ok(),
            Number::Real(v) => Some(*v as i32),
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Number::Undefined => None,
            Number::Signed(v) => u32::try_from(*v).ok(),
            Number::Unsigned(v) => Some(*v),
            Number::Real(v) => Some(*v as u32),
        }
    }
}

fn widest(a: &Number, b: &Number) -> Kind {
    use Kind::*;
    match (Kind::of(a), Kind::of(b)) {
        (Real, _) | (_, Real) => Real,
        (Signed, _) | (_, Signed) => Signed,
        _ => Unsigned,
    }
}

#[derive(PartialEq)]
enum Kind {
    Signed,
    Unsigned,
    Real,
}

impl Kind {
    fn of(n: &Number) -> Self {
        match n {
            Number::Undefined | Number::Unsigned(_) => Kind::Unsigned,
            Number::Signed(_) => Kind::Signed,
            Number::Real(_) => Kind::Real,
        }
    }
}

impl core::ops::Add for Number {
    type Output = Number;

    fn add(self, rhs: Number) -> Number {
        match widest(&self, &rhs) {
            Kind::Real => Number::Real(self.as_f64().unwrap_or(0.0) + rhs.as_f64().unwrap_or(0.0)),
            Kind::Signed => Number::Signed(
                self.as_i32().unwrap_or(0).wrapping_add(rhs.as_i32().unwrap_or(0)),
            ),
            Kind::Unsigned => Number::Unsigned(
                self.as_u32().unwrap_or(0).wrapping_add(rhs.as_u32().unwrap_or(0)),
            ),
        }
    }
}

impl core::ops::Mul for Number {
    type Output = Number;

    fn mul(self, rhs: Number) -> Number {
        match widest(&self, &rhs) {
            Kind::Real => Number::Real(self.as_f64().unwrap_or(0.0) * rhs.as_f64().unwrap_or(0.0)),
            Kind::Signed => Number::Signed(
                self.as_i32().unwrap_or(0).wrapping_mul(rhs.as_i32().unwrap_or(0)),
            ),
            Kind::Unsigned => Number::Unsigned(
                self.as_u32().unwrap_or(0).wrapping_mul(rhs.as_u32().unwrap_or(0)),
            ),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Number::Undefined => write!(f, "undefined"),
            Number::Signed(v) => write!(f, "{}", v),
            Number::Unsigned(v) => write!(f, "{}", v),
            Number::Real(v) => write!(f, "{}", v),
        }
    }
}

impl From<i32> for Number {
    fn from(v: i32) -> Self {
        Number::Signed(v)
    }
}

impl From<u32> for Number {
    fn from(v: u32) -> Self {
        Number::Unsigned(v)
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Number::Real(v)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn undefined_is_not_defined() {
        assert!(!Number::Undefined.is_defined());
        assert!(Number::Signed(0).is_defined());
    }

    #[test]
    fn addition_widens_to_real() {
        let a = Number::Unsigned(3);
        let b = Number::Real(1.5);
        assert_eq!(a + b, Number::Real(4.5));
    }

    #[test]
    fn addition_widens_unsigned_to_signed() {
        let a = Number::Signed(-2);
        let b = Number::Unsigned(5);
        assert_eq!(a + b, Number::Signed(3));
    }

    #[test]
    fn multiplication_preserves_kind() {
        let a = Number::Unsigned(4);
        let b = Number::Unsigned(5);
        assert_eq!(a * b, Number::Unsigned(20));
    }
}
