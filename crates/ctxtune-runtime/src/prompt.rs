//! Synthetic prompts that fill a context window

/// One line of code-like filler; tokenises at roughly 3.5 characters per token
pub const FILLER_LINE: &str = "function test() { const x = 100; return x * 2; } // Filler.\n";

/// Average characters per token for [`FILLER_LINE`]
pub const CHARS_PER_TOKEN: f64 = 3.5;

/// Overshoot so the server has to truncate rather than leave room to spare
pub const OVERFILL: f64 = 1.1;

/// Number of characters needed to fill `context_size` tokens
pub fn target_chars(context_size: u32) -> usize {
    (context_size as f64 * OVERFILL * CHARS_PER_TOKEN) as usize
}

/// Build a prompt of about 1.1 x `context_size` tokens
pub fn filler_prompt(context_size: u32) -> String {
    let chars = target_chars(context_size);
    let repeats = chars / FILLER_LINE.len() + 1;
    let mut prompt = FILLER_LINE.repeat(repeats);
    prompt.truncate(chars);
    prompt
}
