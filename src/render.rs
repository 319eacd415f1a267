use pulldown_cmark::{html, Options, Parser};

use crate::defaults::FontDesign;
use crate::effective::ResolvedSettings;
use crate::sequence::ChatMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Html(String),
    Plain(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub header: Option<String>,
    pub body: Body,
    pub font_design: FontDesign,
    pub font_size: u32,
}

pub fn markdown_to_html(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(text, options);

    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

pub fn render_message(message: &ChatMessage, settings: &ResolvedSettings) -> RenderedMessage {
    let body = if settings.render_as_markdown {
        Body::Html(markdown_to_html(&message.content))
    } else {
        Body::Plain(message.content.clone())
    };

    RenderedMessage {
        header: settings
            .show_message_headers
            .then(|| message.role.as_str().to_string()),
        body,
        font_design: settings.message_font_design,
        font_size: settings.message_font_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::SettingsResolver;

    #[test]
    fn test_markdown_enabled_by_default() {
        let resolver = SettingsResolver::in_memory();
        let resolved = resolver.get_effective_settings(1).resolve();
        let rendered = render_message(&ChatMessage::assistant("**bold** and ~~gone~~"), &resolved);

        match rendered.body {
            Body::Html(html) => {
                assert!(html.contains("<strong>bold</strong>"));
                assert!(html.contains("<del>gone</del>"));
            }
            Body::Plain(_) => panic!("expected html"),
        }
        assert_eq!(rendered.header, None);
    }

    #[test]
    fn test_plain_text_with_header_when_overridden() {
        let resolver = SettingsResolver::in_memory();
        let settings = resolver.get_effective_settings(1);
        settings.set_render_as_markdown(false);
        settings.set_show_message_headers(true);
        settings.set_message_font_design(FontDesign::Monospaced);

        let rendered = render_message(&ChatMessage::user("**not bold**"), &settings.resolve());
        assert_eq!(rendered.body, Body::Plain("**not bold**".to_string()));
        assert_eq!(rendered.header.as_deref(), Some("user"));
        assert_eq!(rendered.font_design, FontDesign::Monospaced);
    }

    #[test]
    fn test_tables_render() {
        let html = markdown_to_html("| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(html.contains("<table>"));
    }
}
