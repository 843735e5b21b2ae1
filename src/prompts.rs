//! Prompt templates
//!
//! Two prompts drive the assistant: the SQL generation prompt used on the
//! first pass, and the refinement prompt used when the model declines.

use crate::llm::ChatMessage;
use crate::schema_rag::SchemaContext;

/// Sentence the model is instructed to emit when it cannot answer with SQL.
pub const REFUSAL_SENTENCE: &str =
    "I cannot generate a SQL query for this request based on the provided schema.";

/// Static instructions for the SQL generation pass. The refusal sentence
/// follows on the next line, then the retrieved schema context.
pub const SYSTEM_PROMPT: &str = r#"You are an expert data analyst who translates natural language questions into GoogleSQL queries for BigQuery.

Rules:
1. Use only the tables and columns described in the Schema Context below. Never invent table or column names.
2. If the question can be answered from the schema, respond with a single SQL query and nothing else. Do not wrap it in explanations.
3. Only produce read-only SELECT statements. Never produce INSERT, UPDATE, DELETE, MERGE, CREATE, DROP or ALTER statements.
4. Qualify ambiguous column names with their table name and prefer explicit JOIN ... ON clauses.
5. If the question cannot be answered with the provided schema (the data is not there, the request is not a data question, or it is too vague to map to tables), respond with exactly this sentence and nothing else:"#;

/// Generation instructions naming `refusal_sentence` as the reply to use
/// when the schema cannot answer the question.
pub fn system_prompt(refusal_sentence: &str) -> String {
    format!("{}\n{}", SYSTEM_PROMPT, refusal_sentence)
}

/// A system/human message pair ready to send to a chat model.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub human: ChatMessage,
}

impl Prompt {
    /// Primary generation prompt: instructions ending in the refusal
    /// sentence, then the schema context.
    pub fn generation(query: &str, context: &SchemaContext, refusal_sentence: &str) -> Self {
        Self {
            system: format!("{}\nSchema Context:\n{}", system_prompt(refusal_sentence), context),
            human: ChatMessage::human(query),
        }
    }

    /// Refinement prompt used after a refusal. It embeds the original query
    /// and schema context in the system instructions and forwards the given
    /// human message unchanged.
    pub fn refinement(query: &str, context: &SchemaContext, human: ChatMessage) -> Self {
        Self {
            system: refinement_instructions(query, context),
            human,
        }
    }

    pub fn to_messages(&self) -> Vec<ChatMessage> {
        vec![ChatMessage::system(self.system.clone()), self.human.clone()]
    }
}

fn refinement_instructions(query: &str, context: &SchemaContext) -> String {
    format!(
        r#"You help users rephrase natural language questions so that they can be answered from a database schema.

IMPORTANT INSTRUCTIONS:
1. You must NOT write or include any SQL query, SQL fragment or SQL syntax in your answer.
2. Explain briefly why the user's question could not be turned into a valid query against the schema.
3. Return at least 3 refined natural language prompts that fix the problems with the original question and only refer to data present in the schema.
4. Do not explain how to write queries and do not describe query structure.

User question to refine:
{query}

Schema Context:
{context}

Respond using exactly this format:
1. **Why the Query Failed:**
- <short explanation>
2. **Refined Prompts:**
- Refined Prompt 1: <first refined question>
- Refined Prompt 2: <second refined question>
- Refined Prompt 3: <third refined question>

Reminder: no SQL, no suggested queries, no "improved SQL" section."#
    )
}
