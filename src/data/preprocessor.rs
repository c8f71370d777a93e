// ============================================================
// Layer 4 - Caption Preprocessor
// ============================================================
// Normalises annotator captions before they reach the vocabulary.
//
// Raw captions contain:
//   - mixed case ("A dog" vs "a dog")
//   - punctuation glued to words ("grass." / "dog's")
//   - stray tabs, double spaces, trailing newlines
//
// Left alone, every variant would burn its own vocabulary slot.
//
// Cleaning steps (applied in order):
//   1. Lowercase
//   2. Replace every non-alphanumeric character with a space
//   3. Collapse runs of whitespace into one space and trim

pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Clean a caption for tokenisation. Returns an owned String.
    pub fn clean(&self, text: &str) -> String {
        // ── Steps 1+2: lowercase and blank out punctuation ───────────────────
        let step1: String = text
            .chars()
            .flat_map(char::to_lowercase)
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();

        // ── Step 3: collapse whitespace ───────────────────────────────────────
        step1.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}
