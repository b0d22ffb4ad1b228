/// Turns a raw rtl_433 model string into a lookup key.
///
/// Spaces, slashes and periods become underscores; ampersands are removed.
pub fn sanitize_model(model: &str) -> String {
    model
        .chars()
        .filter(|&c| c != '&')
        .map(|c| match c {
            ' ' | '/' | '.' => '_',
            c => c,
        })
        .collect()
}
