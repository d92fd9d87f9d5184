//! Routing from IR intrinsic identity to WGSL built-in calls.
//!
//! Consulted before the generic method-call path. Unknown names fall through
//! to a heuristic that maps common math tokens embedded in the method name.

/// How a routed intrinsic is spelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Intrinsic {
    /// Plain `name(args...)` call.
    Direct(&'static str),
    /// `sign` wrapped back to the integer domain when the result is integral.
    Sign,
    /// `1.0 / sqrt(x)`.
    Rsqrt,
    /// `1.0 / x`.
    Rcp,
}

/// Exact-name registry.
pub(crate) fn route(name: &str) -> Option<Intrinsic> {
    let routed = match name {
        "abs" => Intrinsic::Direct("abs"),
        "sign" => Intrinsic::Sign,
        "atan2" => Intrinsic::Direct("atan2"),
        "min" => Intrinsic::Direct("min"),
        "max" => Intrinsic::Direct("max"),
        "pow" => Intrinsic::Direct("pow"),
        "clamp" => Intrinsic::Direct("clamp"),
        "fma" => Intrinsic::Direct("fma"),
        "sqrt" => Intrinsic::Direct("sqrt"),
        "rsqrt" => Intrinsic::Rsqrt,
        "rcp" => Intrinsic::Rcp,
        "floor" => Intrinsic::Direct("floor"),
        "ceil" => Intrinsic::Direct("ceil"),
        "exp" => Intrinsic::Direct("exp"),
        "exp2" => Intrinsic::Direct("exp2"),
        "log" => Intrinsic::Direct("log"),
        "log2" => Intrinsic::Direct("log2"),
        "sin" => Intrinsic::Direct("sin"),
        "cos" => Intrinsic::Direct("cos"),
        "tan" => Intrinsic::Direct("tan"),
        "tanh" => Intrinsic::Direct("tanh"),
        _ => return None,
    };
    Some(routed)
}

/// Longest-token-first scan over a lowercased method name. `Math.Atan2` and
/// `sinf`-style names land on the right built-in this way.
pub(crate) fn heuristic(name: &str) -> Option<&'static str> {
    const TOKENS: &[(&str, &str)] = &[
        ("atan2", "atan2"),
        ("asin", "asin"),
        ("acos", "acos"),
        ("atan", "atan"),
        ("sinh", "sinh"),
        ("cosh", "cosh"),
        ("tanh", "tanh"),
        ("exp2", "exp2"),
        ("log2", "log2"),
        ("sqrt", "sqrt"),
        ("floor", "floor"),
        ("ceil", "ceil"),
        ("clamp", "clamp"),
        ("sin", "sin"),
        ("cos", "cos"),
        ("tan", "tan"),
        ("exp", "exp"),
        ("log", "log"),
        ("abs", "abs"),
        ("min", "min"),
        ("max", "max"),
        ("pow", "pow"),
        ("fma", "fma"),
    ];
    let lowered = name.to_ascii_lowercase();
    TOKENS
        .iter()
        .find(|(token, _)| lowered.contains(token))
        .map(|&(_, builtin)| builtin)
}
