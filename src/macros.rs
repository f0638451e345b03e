#[macro_export]
macro_rules! regex {
    ($pat:literal) => {{
        static RE: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new($pat).unwrap());
        &*RE
    }};
}

/// Build a [`Rule`](crate::Rule): `rule!("$Lhs" => ["$A", "token"], sem)`.
/// An optional trailing flag pins the search mode: `anchored` / `floating`.
#[macro_export]
macro_rules! rule {
    ($lhs:literal => [ $($sym:expr),* $(,)? ], $sem:expr, anchored $(,)?) => {
        $crate::rule!($lhs => [ $($sym),* ], $sem).with_anchored(true)
    };
    ($lhs:literal => [ $($sym:expr),* $(,)? ], $sem:expr, floating $(,)?) => {
        $crate::rule!($lhs => [ $($sym),* ], $sem).with_floating(true)
    };
    ($lhs:literal => [ $($sym:expr),* $(,)? ], $sem:expr $(,)?) => {
        $crate::Rule::new($lhs, vec![ $($sym.to_string()),* ], ::std::sync::Arc::new($sem))
    };
}
