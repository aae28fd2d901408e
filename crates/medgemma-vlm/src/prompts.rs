use crate::chat::{Message, Role};

/// System instruction for term explanations.
pub const TERMINOLOGIST_INSTRUCTION: &str = "You are an expert medical terminologist. Explain the following medical term clearly and concisely for a medical student.";

/// System instruction for questions about an uploaded image.
pub const IMAGE_TUTOR_INSTRUCTION: &str = "You are an expert medical educator. You are given a short automatic description of a medical image uploaded by a medical student. Answer the student's question clearly and concisely, and say so when the description is not enough to answer.";

/// Conversation asking the model to explain `term`.
pub fn explain_term(term: &str) -> Vec<Message> {
    vec![
        Message::text(Role::System, TERMINOLOGIST_INSTRUCTION),
        Message::text(Role::User, format!("Explain the medical term: {}", term.trim())),
    ]
}

/// Conversation asking the model to answer `question` about an image known only by
/// its caption.
pub fn image_question(description: &str, question: &str) -> Vec<Message> {
    vec![
        Message::text(Role::System, IMAGE_TUTOR_INSTRUCTION),
        Message::text(
            Role::User,
            format!(
                "Image description: {}\n\nQuestion: {}",
                description.trim(),
                question.trim()
            ),
        ),
    ]
}
