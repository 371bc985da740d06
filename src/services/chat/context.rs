// Context Assembler
//
// Builds the effective model input for a turn from memory facts and the
// user's text. Pure and deterministic so it is testable in isolation.

const GENERAL_HEADER: &str = "[General memory]";
const SCOPED_HEADER: &str = "[Topic memory]";
const USER_HEADER: &str = "[User message]";

/// Assemble the effective input text for one turn.
/// General facts come first, then scoped facts, then the verbatim user
/// text. When no facts exist the user text passes through unlabeled.
pub fn assemble(general_facts: &[String], scoped_facts: &[String], user_text: &str) -> String {
    if general_facts.is_empty() && scoped_facts.is_empty() {
        return user_text.to_string();
    }

    let mut blocks: Vec<String> = Vec::with_capacity(3);

    if !general_facts.is_empty() {
        blocks.push(format!("{}\n{}", GENERAL_HEADER, general_facts.join("\n")));
    }
    if !scoped_facts.is_empty() {
        blocks.push(format!("{}\n{}", SCOPED_HEADER, scoped_facts.join("\n")));
    }
    blocks.push(format!("{}\n{}", USER_HEADER, user_text));

    blocks.join("\n\n")
}
