//! Message construction macros

/// Creates a user message
#[macro_export]
macro_rules! user {
    ($content:expr) => {
        $crate::types::ChatMessage::user($content)
    };
}

/// Creates a system message
#[macro_export]
macro_rules! system {
    ($content:expr) => {
        $crate::types::ChatMessage::system($content)
    };
}

/// Creates an assistant message
#[macro_export]
macro_rules! assistant {
    ($content:expr) => {
        $crate::types::ChatMessage::assistant($content)
    };
}

/// Creates a tool result message answering the call `id`
#[macro_export]
macro_rules! tool {
    ($content:expr, id: $id:expr, name: $name:expr) => {
        $crate::types::ChatMessage::tool($content, $id, $name)
    };
}

/// User message with text followed by one image
#[macro_export]
macro_rules! user_with_image {
    ($text:expr, $image_url:expr) => {
        $crate::types::ChatMessage::user(vec![
            $crate::types::ContentPart::text($text),
            $crate::types::ContentPart::image_url($image_url),
        ])
    };
}

/// Creates a collection of messages
#[macro_export]
macro_rules! messages {
    ($($msg:expr),* $(,)?) => {
        vec![$($msg),*]
    };
}
