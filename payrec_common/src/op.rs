/// Implements the standard operator traits for single-field tuple newtypes.
///
/// `binary` covers `Add`/`Sub` style traits, `inplace` covers the `*Assign`
/// variants and `unary` covers `Neg`.
#[macro_export]
macro_rules! op {
    (binary $t:ident, $trait:ident, $method:ident) => {
        impl $trait for $t {
            type Output = Self;

            fn $method(self, rhs: Self) -> Self::Output {
                Self(self.0.$method(rhs.0))
            }
        }
    };
    (inplace $t:ident, $trait:ident, $method:ident) => {
        impl $trait for $t {
            fn $method(&mut self, rhs: Self) {
                self.0.$method(rhs.0);
            }
        }
    };
    (unary $t:ident, $trait:ident, $method:ident) => {
        impl $trait for $t {
            type Output = Self;

            fn $method(self) -> Self::Output {
                Self(self.0.$method())
            }
        }
    };
}
