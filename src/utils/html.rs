use ammonia;

/// Sanitizes teacher-authored rich text (notification bodies, experiment descriptions).
///
/// Whitelist based: formatting tags such as <b> and <p> survive, while <script>,
/// <iframe> and event-handler attributes are stripped. A <script> element is removed
/// together with its content.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}
