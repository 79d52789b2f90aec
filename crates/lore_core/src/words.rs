pub trait WordCounter: Send + Sync {
    fn count(&self, text: &str) -> u32;
}

/// Counts whitespace-separated words.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceWordCounter;

impl WordCounter for WhitespaceWordCounter {
    fn count(&self, text: &str) -> u32 {
        saturating_u32(text.split_whitespace().count())
    }
}

fn saturating_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}
