pub mod logging;

/// `true` when `MINDANCHOR_DEBUG` is set to `1`/`true`.
pub fn debug_mode() -> bool {
    std::env::var("MINDANCHOR_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
