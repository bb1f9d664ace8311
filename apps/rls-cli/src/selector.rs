use std::io::{BufRead, Write};

use modkit_rls::{FieldSelector, ModelRef, Result};

/// Asks on a terminal which candidate fields each model enforces.
///
/// Empty input skips the model; `*` or `all` takes every candidate. Anything
/// else is a comma or whitespace separated list of field names.
pub struct PromptSelector<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptSelector<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> FieldSelector for PromptSelector<R, W> {
    fn select(&mut self, model: &ModelRef, candidates: &[String]) -> Result<Vec<String>> {
        writeln!(self.output, "Model {} (table {})", model.name, model.table)?;
        writeln!(self.output, "  candidate fields: {}", candidates.join(", "))?;
        write!(
            self.output,
            "  fields to enforce [all / comma separated / empty to skip]: "
        )?;
        self.output.flush()?;

        let mut line = String::new();
        self.input.read_line(&mut line)?;
        Ok(parse_selection(&line, candidates))
    }
}

fn parse_selection(line: &str, candidates: &[String]) -> Vec<String> {
    let line = line.trim();
    if line == "*" || line.eq_ignore_ascii_case("all") {
        return candidates.to_vec();
    }

    let mut selected: Vec<String> = Vec::new();
    for name in line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
    {
        if !selected.iter().any(|s| s == name) {
            selected.push(name.to_owned());
        }
    }
    selected
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn candidates() -> Vec<String> {
        vec!["tenant_id".to_owned(), "user_id".to_owned()]
    }

    fn ask(answer: &str) -> (Vec<String>, String) {
        let mut out = Vec::new();
        let selected = {
            let mut selector = PromptSelector::new(Cursor::new(answer.as_bytes()), &mut out);
            selector
                .select(&ModelRef::new("Order", "shop_order"), &candidates())
                .unwrap()
        };
        (selected, String::from_utf8(out).unwrap())
    }

    #[test]
    fn prompt_names_model_and_candidates() {
        let (_, prompt) = ask("\n");
        assert!(prompt.contains("Model Order (table shop_order)"));
        assert!(prompt.contains("tenant_id, user_id"));
    }

    #[test]
    fn empty_answer_skips() {
        assert!(ask("\n").0.is_empty());
        assert!(ask("").0.is_empty());
    }

    #[test]
    fn all_takes_every_candidate() {
        assert_eq!(ask("all\n").0, candidates());
        assert_eq!(ask("*\n").0, candidates());
    }

    #[test]
    fn list_is_split_and_deduplicated() {
        assert_eq!(ask("tenant_id\n").0, vec!["tenant_id"]);
        assert_eq!(
            ask(" user_id, tenant_id  user_id\n").0,
            vec!["user_id", "tenant_id"]
        );
    }

    #[test]
    fn unknown_names_are_passed_through() {
        // The author rejects them with a precise error.
        assert_eq!(ask("org_id\n").0, vec!["org_id"]);
    }
}
