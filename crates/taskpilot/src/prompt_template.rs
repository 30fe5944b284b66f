use include_dir::{include_dir, Dir};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tera::{Context, Error as TeraError, Tera};

// Prompts shipped with the crate
static PROMPTS: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/prompts");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

/// Render a template file, read from disk when the path exists and from the embedded
/// prompts otherwise
pub fn load_prompt_file<T: Serialize>(
    template_file: impl Into<PathBuf>,
    context_data: &T,
) -> Result<String, TeraError> {
    let template_path = template_file.into();

    let template_content = if template_path.exists() {
        fs::read_to_string(&template_path)
            .map_err(|e| TeraError::chain("Failed to read template file", e))?
    } else {
        embedded_prompt(&template_path)?.to_string()
    };
    load_prompt(&template_content, context_data)
}

fn embedded_prompt(path: &Path) -> Result<&'static str, TeraError> {
    PROMPTS
        .get_file(path)
        .and_then(|file| file.contents_utf8())
        .ok_or_else(|| TeraError::msg(format!("Prompt not found: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::fs;

    #[test]
    fn test_load_prompt() {
        let template = "Hello, {{ name }}! You are {{ age }} years old.";
        let mut context = HashMap::new();
        context.insert("name".to_string(), "Alice".to_string());
        context.insert("age".to_string(), 30.to_string());

        let result = load_prompt(template, &context).unwrap();
        assert_eq!(result, "Hello, Alice! You are 30 years old.");
    }

    #[test]
    fn test_load_prompt_missing_variable() {
        let template = "Hello, {{ name }}! You are {{ age }} years old.";
        let mut context = HashMap::new();
        context.insert("name".to_string(), "Alice".to_string());
        let result = load_prompt(template, &context);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_prompt_file_from_disk() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test_template.txt");
        fs::write(&file_path, "Hello, {{ name }}!").unwrap();

        let result = load_prompt_file(file_path, &json!({"name": "Bob"})).unwrap();
        assert_eq!(result, "Hello, Bob!");
    }

    #[test]
    fn test_load_prompt_file_missing_file() {
        let context: HashMap<String, String> = HashMap::new();
        let result = load_prompt_file("non_existent_template.txt", &context);
        assert!(result.is_err());
    }

    #[test]
    fn test_attractions_prompt_with_and_without_local_data() {
        let grounded = load_prompt_file(
            "attractions.md",
            &json!({"location": "Auckland", "local_data": "Sky Tower"}),
        )
        .unwrap();
        assert_eq!(
            grounded.trim_end(),
            "Get attractions in this location: Auckland, prioritise using the following local data: Sky Tower."
        );

        let plain =
            load_prompt_file("attractions.md", &json!({"location": "Auckland", "local_data": ""}))
                .unwrap();
        assert_eq!(plain.trim_end(), "Get attractions in this location: Auckland.");
    }

    #[test]
    fn test_itinerary_prompt_unknown_duration() {
        let rendered = load_prompt_file(
            "itinerary.md",
            &json!({"attractions": "[]", "duration": null}),
        )
        .unwrap();
        assert!(rendered.trim_end().ends_with("spread into suitable days."));
    }

    #[test]
    fn test_qa_context_lists_every_chunk() {
        let rendered = load_prompt_file(
            "qa_context.md",
            &json!({"question": "Where?", "chunks": ["one", "two"]}),
        )
        .unwrap();
        assert_eq!(
            rendered,
            "Answer the question using only the article provided.\n\nQuestion: Where?\n\nArticle:\n\none\n\ntwo\n\n\n"
        );
    }
}
