//! Macros for defining typed ID types.

/// Macro to define a typed numeric ID.
///
/// This generates a newtype wrapper around `i64` with:
/// - A `KIND` constant used in error messages
/// - `new()` and `get()`
/// - `Display` and `FromStr` implementations (plain decimal)
/// - Transparent `Serialize` and `Deserialize` implementations
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_id!(ProblemId, "problem");
///
/// let id = ProblemId::new(1);
/// let parsed: ProblemId = "1".parse()?;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $kind:literal) => {
        /// A typed ID for this resource type.
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Resource kind, used in error messages.
            pub const KIND: &'static str = $kind;

            /// Wraps a raw value.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw value.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }

            /// Parses an ID from its decimal form.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                s.parse::<i64>()
                    .map(Self)
                    .map_err(|_| $crate::IdError::NotNumeric {
                        kind: Self::KIND,
                        value: s.to_string(),
                    })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> i64 {
                id.0
            }
        }
    };
}
