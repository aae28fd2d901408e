use image::DynamicImage;

use crate::chat::Message;
use crate::error::VlmError;

/// A model that continues a chat conversation.
pub trait TextGenerator: Send {
    /// Generate the next model turn for `messages`, at most `max_new_tokens` long.
    fn generate(&mut self, messages: &[Message], max_new_tokens: usize)
        -> Result<String, VlmError>;
}

/// A model that describes an image in one sentence.
pub trait ImageCaptioner: Send {
    fn caption(&mut self, image: &DynamicImage) -> Result<String, VlmError>;
}

impl<T: TextGenerator + ?Sized> TextGenerator for Box<T> {
    fn generate(
        &mut self,
        messages: &[Message],
        max_new_tokens: usize,
    ) -> Result<String, VlmError> {
        (**self).generate(messages, max_new_tokens)
    }
}

impl<T: ImageCaptioner + ?Sized> ImageCaptioner for Box<T> {
    fn caption(&mut self, image: &DynamicImage) -> Result<String, VlmError> {
        (**self).caption(image)
    }
}
