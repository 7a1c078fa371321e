use shared::{Diagnosis, InferenceResponse};

/// Everything the upload page can show. An empty view is the bare form.
#[derive(Debug, Default, Clone)]
pub struct IndexView {
    pub file_name: Option<String>,
    pub prediction: Option<InferenceResponse>,
    pub image_url: Option<String>,
    pub notice: Option<String>,
    pub error: Option<String>,
}

impl IndexView {
    pub fn notice(message: impl Into<String>) -> Self {
        Self {
            notice: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn render_result(view: &IndexView) -> String {
    let Some(prediction) = &view.prediction else {
        return String::new();
    };

    let class = match prediction.diagnosis {
        Diagnosis::Normal => "normal",
        Diagnosis::Pneumonia => "pneumonia",
    };
    let file_name = view
        .file_name
        .as_deref()
        .map(|name| format!(r#"<p class="filename">{}</p>"#, escape_html(name)))
        .unwrap_or_default();
    let image = view
        .image_url
        .as_deref()
        .map(|url| {
            format!(
                r#"<img id="xray-image" src="{}" alt="Uploaded chest X-ray">"#,
                escape_html(url)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<section class="result {class}">
      {file_name}
      <h2 id="diagnosis">{diagnosis}</h2>
      <p>Model output: <span id="score">{score}</span></p>
      {image}
    </section>"#,
        class = class,
        file_name = file_name,
        diagnosis = prediction.diagnosis,
        score = escape_html(&prediction.score),
        image = image,
    )
}

pub fn render_index(view: &IndexView) -> String {
    let notice = view
        .notice
        .as_deref()
        .map(|message| format!(r#"<p class="notice">{}</p>"#, escape_html(message)))
        .unwrap_or_default();
    let error = view
        .error
        .as_deref()
        .map(|message| format!(r#"<p class="error" role="alert">{}</p>"#, escape_html(message)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Chest X-ray Pneumonia Screening</title>
    <link rel="stylesheet" href="/static/style.css">
</head>
<body>
  <main class="container">
    <h1>Chest X-ray Pneumonia Screening</h1>
    <p class="subtitle">Upload a chest X-ray in JPG, PNG or GIF format.</p>
    {notice}
    {error}
    <form method="post" action="/" enctype="multipart/form-data">
      <input type="file" name="file" accept=".jpg,.jpeg,.png,.gif">
      <button type="submit">Analyze</button>
    </form>
    {result}
  </main>
</body>
</html>
"#,
        notice = notice,
        error = error,
        result = render_result(view),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_view_is_bare_form() {
        let html = render_index(&IndexView::default());
        assert!(html.contains(r#"name="file""#));
        assert!(!html.contains("xray-image"));
        assert!(!html.contains("diagnosis"));
    }

    #[test]
    fn result_shows_label_score_and_image() {
        let view = IndexView {
            file_name: Some("scan.png".into()),
            prediction: Some(InferenceResponse::from_probability(0.734)),
            image_url: Some("/images/abc.png".into()),
            ..IndexView::default()
        };
        let html = render_index(&view);
        assert!(html.contains(r#"<h2 id="diagnosis">Pneumonia</h2>"#));
        assert!(html.contains(r#"<span id="score">0.73</span>"#));
        assert!(html.contains(r#"src="/images/abc.png""#));
        assert!(html.contains("scan.png"));
    }

    #[test]
    fn user_text_is_escaped() {
        let html = render_index(&IndexView::error("<script>alert('x')</script>"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;"));
    }
}
