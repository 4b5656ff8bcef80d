//! Decision prompt construction.

use linkrally_core::{RallyError, Result};
use minijinja::Environment;
use once_cell::sync::Lazy;
use serde::Serialize;

const DECISION_TEMPLATE: &str = "\
You are playing a link race on an encyclopedia. You navigate from article to \
article by following hyperlinks, trying to reach the target article in as few \
hops as possible.

Current article: {{ current }}
Target article: {{ destination }}

Links available from the current article:
{% for link in links %}{{ loop.index }}. {{ link }}
{% endfor %}
Path taken so far: {{ path | join(\" -> \") }}

Pick the link most likely to lead toward the target. Reply with the number of \
your chosen link, wrapped in answer tags, like this: <answer>3</answer>. \
Reply with exactly one number between 1 and {{ links | length }}.
{%- if previous_error %}

Your previous reply could not be used: {{ previous_error }}
{%- endif %}
";

static TEMPLATES: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    env.add_template("decision", DECISION_TEMPLATE)
        .expect("static decision template parses");
    env
});

/// Context for one turn's decision prompt.
#[derive(Debug, Serialize)]
pub struct DecisionPrompt<'a> {
    pub current: &'a str,
    pub destination: &'a str,
    pub links: &'a [String],
    pub path: &'a [String],
    /// On retry, a verbatim restatement of the previous parse error
    pub previous_error: Option<&'a str>,
}

/// Renders the decision prompt for one model attempt.
pub fn render_decision_prompt(ctx: &DecisionPrompt<'_>) -> Result<String> {
    let template = TEMPLATES
        .get_template("decision")
        .map_err(|e| RallyError::internal(format!("decision template missing: {e}")))?;
    template
        .render(ctx)
        .map_err(|e| RallyError::internal(format!("decision template render failed: {e}")))
}
