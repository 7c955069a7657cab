//! Prompt rendering for the two prompting methods.

use structeval_types::{DatasetItem, PromptingMethod};

use crate::registry::{Reference, TaskContract};

const NO_FENCES: &str = "IMPORTANT!! Do not start the JSON with ```json or end it with ```.";

/// The (name, value) pairs a contract consumes from one dataset item.
pub fn references_for(contract: &TaskContract, item: &DatasetItem) -> Vec<(&'static str, String)> {
    contract
        .references
        .iter()
        .map(|r| {
            let value = match r {
                Reference::Context => item.context.clone(),
                Reference::Question => item.question.clone(),
                Reference::Answer => item.answer.clone(),
                Reference::Document => item.document.clone(),
                Reference::Classes => contract
                    .categories
                    .iter()
                    .map(|c| format!("{}: {}", c.name, c.description))
                    .collect::<Vec<_>>()
                    .join("\n"),
            };
            (r.name(), value)
        })
        .collect()
}

pub fn render(method: PromptingMethod, contract: &TaskContract, references: &[(&str, String)]) -> String {
    match method {
        PromptingMethod::Fstring => render_fstring(contract, references),
        PromptingMethod::Dspy => render_signature(contract, references),
    }
}

fn render_fstring(contract: &TaskContract, references: &[(&str, String)]) -> String {
    let refs = references
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join(" | ");
    format!(
        "Instructions: {}\nReferences: {}\nOutput the result as a JSON string with the following format: {}\n{}",
        contract.instructions,
        refs,
        contract.response_format.describe(),
        NO_FENCES
    )
}

/// Signature-style layout: instructions, a field legend, then the filled inputs.
fn render_signature(contract: &TaskContract, references: &[(&str, String)]) -> String {
    let mut out = String::new();
    out.push_str(&contract.instructions);
    out.push_str("\n\n---\n\nFollow the following format.\n\n");
    for (name, _) in references {
        out.push_str(&format!("{}: ${{{}}}\n", title_case(name), name));
    }
    out.push_str(&format!(
        "Output: a JSON value with the following format: {}. {}\n\n---\n\n",
        contract.response_format.describe(),
        NO_FENCES
    ));
    for (name, value) in references {
        out.push_str(&format!("{}: {}\n", title_case(name), value));
    }
    out.push_str("Output:");
    out
}

fn title_case(name: &str) -> String {
    name.split('_')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
