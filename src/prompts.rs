//! System prompt describing the window request/reply contract.
//!
//! Callers can override it via [`crate::config::WindowConfig::system_prompt`];
//! the constant is used only when no override is provided. Whatever prompt is
//! used, replies must follow the fragment format parsed by
//! [`crate::pipeline::response::parse_response`].

/// Default system prompt. Used when `WindowConfig::system_prompt` is `None`.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You receive one XML request of the form

<request range="B-E"><head>...</head><body>...</body><tail>...</tail></request>

Every element directly inside head, body and tail is a source unit carrying an index attribute.
Only the body is yours to transcribe. Head and tail are context from the neighbouring requests:
read them to understand how the body starts and ends, but do not transcribe them.

Reply with exactly one XML element and nothing else:

<response>
  <p index="I">...</p>
  <figure index="I">...</figure>
  <citation id="N" index="I">...</citation>
</response>

Rules:
1. Every child of <response> carries the index of the unit it starts in.
2. A paragraph that runs past the end of a unit declares its last unit with to="J".
3. Use <figure>, <table>, <formula> or <asset> for non-text content.
4. Mark a reference to citation N as <ref id="N"/> inside the text.
5. Define each citation you see as <citation id="N" index="I">...</citation>.
6. Do not wrap the reply in markdown fences.
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::response::ASSET_TAGS;

    #[test]
    fn prompt_names_every_asset_tag() {
        for tag in ASSET_TAGS {
            assert!(DEFAULT_SYSTEM_PROMPT.contains(&format!("<{tag}>")), "{tag}");
        }
    }

    #[test]
    fn prompt_describes_spans_and_refs() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("to=\"J\""));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("<ref id=\"N\"/>"));
    }
}
