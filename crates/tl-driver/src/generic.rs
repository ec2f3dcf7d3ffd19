use crate::ParseResult;

/// Driver for arbitrary commands: no semantic parsing, bytes flow through.
pub struct GenericDriver;

impl GenericDriver {
    pub fn parse(&mut self, chunk: &[u8]) -> ParseResult {
        ParseResult {
            raw: chunk.to_vec(),
            events: Vec::new(),
            messages: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_bytes_through_unchanged() {
        let mut driver = GenericDriver;
        let input = b"\x1b[31mRed text\x1b[0m";
        let result = driver.parse(input);
        assert_eq!(result.raw, input);
        assert!(result.events.is_empty());
        assert!(result.messages.is_empty());
    }

    #[test]
    fn does_not_detect_question_patterns() {
        let mut driver = GenericDriver;
        let result = driver.parse(b"Continue? (y/n)");
        assert!(result.events.is_empty());
    }

    #[test]
    fn empty_input_yields_empty_result() {
        let mut driver = GenericDriver;
        let result = driver.parse(b"");
        assert!(result.raw.is_empty());
    }
}
