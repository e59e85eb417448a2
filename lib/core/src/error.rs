//! Error handling foundation for colloquy.
//!
//! Each crate defines its own error enums next to the code that raises them
//! and returns `Report<E>` for them; this module only names the alias the
//! binary and the crates' callers share.

use rootcause::Report;

/// A Result whose error is a rootcause report over `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ParseIdError, RunId};

    fn parse_run(s: &str) -> Result<RunId, ParseIdError> {
        Ok(s.parse::<RunId>()?)
    }

    #[test]
    fn reports_carry_the_typed_error() {
        assert!(parse_run("20250309-140507-000").is_ok());
        let err = parse_run("latest").expect_err("should fail");
        assert!(err.to_string().contains("RunId"));
    }
}
