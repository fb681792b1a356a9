use sha2::{Digest, Sha256};

/// Truncate a SHA to its first 7 characters for display
pub fn short_sha(sha: &str) -> &str {
    let end = sha.char_indices().nth(7).map(|(i, _)| i).unwrap_or(sha.len());
    &sha[..end]
}

/// Hex-encoded SHA-256 digest
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    let digest = Sha256::digest(data.as_ref());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Cut `text` to at most `max_chars` characters, respecting char boundaries.
///
/// Returns the original slice when it already fits.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => (&text[..end], true),
        None => (text, false),
    }
}

/// Pull the JSON object out of an LLM reply.
///
/// The first fenced code block wins, whatever its info string. Without a
/// fence, the span from the first `{` to the last `}` is used.
pub fn extract_json_str(response: &str) -> Option<&str> {
    if let Some(block) = fenced_block(response) {
        return Some(block);
    }
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (start < end).then(|| &response[start..=end])
}

fn fenced_block(response: &str) -> Option<&str> {
    let (_, after_open) = response.split_once("```")?;
    let body = match after_open.split_once('\n') {
        Some((info, rest)) if !info.contains("```") => rest,
        _ => after_open.trim_start_matches("json"),
    };
    let (block, _) = body.split_once("```")?;
    Some(block.trim())
}
