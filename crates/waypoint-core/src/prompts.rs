use waypoint_tools::Capability;
use waypoint_types::InvocationResult;

pub fn clarification_prompt(query: &str) -> String {
    format!(
        "You triage requests for a developer assistant that can search code, run allow-listed \
         commands, and read web pages.\n\
         Decide whether the request below can be acted on as written. Ask for clarification only \
         when a reasonable engineer could not start without more information. When you do, ask \
         exactly one short, specific question.\n\n\
         Request:\n{query}"
    )
}

pub fn plan_prompt(query: &str, context: &str) -> String {
    let capabilities = Capability::ALL
        .iter()
        .map(|cap| {
            let args = serde_json::to_string(&cap.argument_schema()).unwrap_or_default();
            format!("- {}: {}\n  arguments: {}", cap.name(), cap.description(), args)
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You plan how to answer a developer's request.\n\
         Write short ordered steps, then the capability calls needed to carry them out, in the \
         order they must run. Later calls may rely on the effects of earlier ones.\n\
         Skip any step whose information is already present in the background knowledge below. \
         Use only these capabilities, with exactly these names and argument shapes:\n\
         {capabilities}\n\n\
         Background knowledge:\n{context}\n\n\
         Request:\n{query}"
    )
}

pub fn answer_prompt(query: &str, context: &str, results: &[InvocationResult]) -> String {
    let rendered = if results.is_empty() {
        "(no capabilities were invoked)".to_string()
    } else {
        results
            .iter()
            .enumerate()
            .map(|(idx, result)| {
                let body = serde_json::to_string(&result.result).unwrap_or_default();
                format!("[{}] {}: {}", idx + 1, result.capability, body)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "Answer the developer's request using the capability results and background knowledge \
         below. Cite results by their [n] number where you use them. If a capability failed, say \
         what could not be verified instead of guessing.\n\n\
         Background knowledge:\n{context}\n\n\
         Capability results:\n{rendered}\n\n\
         Request:\n{query}"
    )
}
