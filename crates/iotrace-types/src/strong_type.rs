/// Declares a transparent newtype over an integer.
///
/// The type derefs to its inner value, converts both ways with `From`,
/// prints as the bare number with `Display` and as `Name(n)` with `Debug`,
/// and (de)serializes as the bare number.
#[macro_export]
macro_rules! strong_type {
    ($(#[$meta:meta])* $name:ident, $inner:ty) => {
        $(#[$meta])*
        #[derive(
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Default,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            #[inline]
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl ::std::ops::Deref for $name {
            type Target = $inner;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(val: $inner) -> Self {
                Self(val)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(val: $name) -> Self {
                val.0
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    strong_type!(
        /// Test-only id.
        ProbeId,
        u32
    );

    #[test]
    fn test_strong_type_get_and_deref() {
        let id = ProbeId(42);
        assert_eq!(id.get(), 42);
        assert_eq!(*id, 42);
    }

    #[test]
    fn test_strong_type_conversions() {
        let id: ProbeId = 7u32.into();
        let raw: u32 = id.into();
        assert_eq!(raw, 7);
        assert_eq!(format!("{}", id), "7");
        assert_eq!(format!("{:?}", id), "ProbeId(7)");
    }

    #[test]
    fn test_strong_type_orders_in_btree() {
        let set: BTreeSet<ProbeId> = [ProbeId(3), ProbeId(1), ProbeId(3)].into_iter().collect();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![ProbeId(1), ProbeId(3)]);
    }

    #[test]
    fn test_strong_type_serde_is_transparent() {
        let json = serde_json::to_string(&ProbeId(9)).unwrap();
        assert_eq!(json, "9");
        let parsed: ProbeId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ProbeId(9));
    }
}
