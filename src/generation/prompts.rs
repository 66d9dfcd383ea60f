//! Instructions and human-turn payloads for each generation stage

use super::contract::Stage;
use super::GenerationRequest;
use crate::retrieval::ChainContext;

const DECISION_MATRIX: &str = "\
## CONTEXT ANALYSIS DECISION MATRIX
1. EXACT MATCH: the target context matches the retrieved context (naming variations allowed). \
Use only the retrieved data of that context and do not rename it.
2. SIMILAR CONTEXT: the same system element in a different subsystem or product of the same category. \
Transfer applicable retrieved data and adapt it to the target context.
3. DIFFERENT CONTEXT: a different product category or no relevant retrieved data. \
Brainstorm from design, development, testing and after-sales perspectives.
";

const OUTPUT_CONTRACT: &str = "\
## OUTPUT FORMAT
Return only a JSON object with exactly two keys: \"analysis_decision\" (the context type and \
reasoning, as a string) and \"content\".";

const FUNCTIONS: &str = "You are an FMEA function generation expert. Generate technical functions \
for a system element. Functions are concrete, verifiable and contain at least a subject and a verb.";

const FAILURES: &str = "You are an FMEA failure analysis expert. Generate failure modes of a \
function, each with one failure cause and one failure effect.";

const EXISTING_MEASURES: &str = "You are an FMEA measures expert. List preventive measures that \
lower the occurrence of a failure cause and detective measures that detect it before the failure \
mode reaches the customer.";

const RISK_RATING: &str = "You are an FMEA risk assessment expert. Rate severity of the failure \
effect, occurrence of the failure cause and detection of the cause within the failure mode, each \
on a scale from 1 to 10.";

const NEW_MEASURES: &str = "You are an FMEA optimization expert. Propose new preventive and \
detective measures that lower the risk of a rated failure chain beyond its existing measures.";

const ANSWER: &str = "You are an expert FMEA analyst. If the user asks to create, develop, build, \
generate, design or structure a system, decompose it into products, subsystems and system \
elements. Otherwise answer the question from the retrieved context.";

const ENTITIES: &str = "You are an FMEA entity extraction specialist. Map entities in the user \
question to these exact types: FailureCause, FailureEffect, FailureMode, Function, Measure, \
Product, Subsystem, SystemElement. When the user requests system structure generation, extract \
only Product entities and add two variations of each (a synonym and a broader category). \
Return ONLY a JSON object keyed by those types, each mapped to a list of strings, using empty \
lists for types without matches.";

fn content_format(stage: Stage) -> &'static str {
    match stage {
        Stage::Functions => "\"content\": a list of function strings, e.g. [\"Filter hydraulic fluid\"]",
        Stage::Failures => {
            "\"content\": a list of objects with keys FailureMode, FailureCause and FailureEffect"
        }
        Stage::ExistingMeasures | Stage::NewMeasures => {
            "\"content\": a list of objects, each either {\"PreventiveMeasure\": \"...\"} or {\"DetectiveMeasure\": \"...\"}"
        }
        Stage::RiskRating => {
            "\"content\": an object {\"Severity\": n, \"Occurrence\": n, \"Detection\": n} with integers 1-10"
        }
        Stage::Answer => {
            "\"content\": for structure generation a JSON array of objects with keys Product, \
             Subsystem and SystemElement, otherwise the text answer as a string"
        }
    }
}

/// System instruction for a stage.
pub fn system_instruction(stage: Stage) -> String {
    let role = match stage {
        Stage::Functions => FUNCTIONS,
        Stage::Failures => FAILURES,
        Stage::ExistingMeasures => EXISTING_MEASURES,
        Stage::RiskRating => RISK_RATING,
        Stage::NewMeasures => NEW_MEASURES,
        Stage::Answer => ANSWER,
    };
    format!(
        "{role}\n\n{DECISION_MATRIX}\n{OUTPUT_CONTRACT}\n{}",
        content_format(stage)
    )
}

fn context_lines(ctx: &ChainContext) -> String {
    let fields = [
        ("Product", ctx.product.as_deref()),
        ("Subsystem", ctx.subsystem.as_deref()),
        ("System Element", ctx.system_element.as_deref()),
        ("Function", ctx.function.as_deref()),
        ("Failure Mode", ctx.failure_mode.as_deref()),
        ("Failure Cause", ctx.failure_cause.as_deref()),
        ("Failure Effect", ctx.failure_effect.as_deref()),
    ];
    let mut lines: Vec<String> = fields
        .iter()
        .filter_map(|(label, value)| value.map(|v| format!("{label}: {v}")))
        .collect();
    if !ctx.preventive_measure.is_empty() {
        lines.push(format!("Preventive Measures: {}", ctx.preventive_measure.join(", ")));
    }
    if !ctx.detective_measure.is_empty() {
        lines.push(format!("Detective Measures: {}", ctx.detective_measure.join(", ")));
    }
    let ratings = [
        ("Severity", ctx.severity),
        ("Occurrence", ctx.occurrence),
        ("Detection", ctx.detection),
    ];
    for (label, rating) in ratings {
        if let Some(rating) = rating {
            lines.push(format!("{label}: {rating}"));
        }
    }
    lines.join("\n")
}

/// Request for one analysis unit of `stage`.
pub fn unit_request(stage: Stage, ctx: &ChainContext, context_data: &str) -> GenerationRequest {
    let human = format!(
        "TARGET CONTEXT:\n{}\n\nRetrieved Context from RAG:\n{}\n\n\
         Analyze the context similarity and generate the {} following the decision matrix.",
        context_lines(ctx),
        context_data,
        stage.as_str().replace('_', " ")
    );
    GenerationRequest::new(system_instruction(stage), human)
}

/// Request answering a free question.
pub fn answer_request(question: &str, context_data: &str) -> GenerationRequest {
    let human = format!(
        "## USER REQUEST\nQuestion: {question}\n\n## RETRIEVED CONTEXT FROM RAG\n{context_data}\n\n\
         Analyze the request type and context similarity, then respond."
    );
    GenerationRequest::new(system_instruction(Stage::Answer), human)
}

/// Request extracting typed entities from a question.
pub fn entity_request(question: &str) -> GenerationRequest {
    let human = format!(
        "Extract FMEA entities from this question: {question}\n\
         Return only the JSON with all entity types, using empty arrays for unmatched types."
    );
    GenerationRequest::new(ENTITIES, human)
}
