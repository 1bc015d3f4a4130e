/// Upper bound for tool result text spliced into a tool-role message.
pub const MAX_TOOL_RESULT_BYTES: usize = 256 * 1024;

/// Truncate `output` if it exceeds `max_bytes`.
/// Cuts at a char boundary and appends a marker showing original vs truncated size.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut boundary = max_bytes;
    while !output.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let truncated = &output[..boundary];
    format!(
        "{truncated}\n\n[truncated: {} bytes -> {} bytes]",
        output.len(),
        boundary
    )
}
