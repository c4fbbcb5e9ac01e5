use poem::{
    error::InternalServerError,
    web::{Html, Json},
    IntoResponse, Response, Result,
};
use serde::Serialize;
use tera::{Context, Tera};

use crate::templates::TEMPLATE_NAME;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VisitorInfo {
    pub ip: String,
    pub user_agent: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub country: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub city: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    Json,
    PlainText,
    Html,
}

impl Representation {
    /// Plain substring checks on the `Accept` header; quality values are not looked at.
    pub fn negotiate(accept: &str) -> Self {
        if accept.contains("application/json") {
            Self::Json
        } else if accept.contains("text/plain") {
            Self::PlainText
        } else {
            Self::Html
        }
    }
}

impl VisitorInfo {
    pub fn to_plain_text(&self) -> String {
        format!(
            "Visitor IP: {}\nUser-Agent: {}\nCountry: {}\nCity: {}\n",
            self.ip, self.user_agent, self.country, self.city
        )
    }

    pub fn render_html(&self, templates: &Tera) -> tera::Result<String> {
        // Empty fields stay in the context so templates never hit an undefined variable
        let mut context = Context::new();
        context.insert("ip", &self.ip);
        context.insert("user_agent", &self.user_agent);
        context.insert("country", &self.country);
        context.insert("city", &self.city);

        templates.render(TEMPLATE_NAME, &context)
    }

    pub fn respond(&self, accept: &str, templates: &Tera) -> Result<Response> {
        Ok(match Representation::negotiate(accept) {
            Representation::Json => Json(self).into_response(),
            Representation::PlainText => Response::builder()
                .content_type("text/plain")
                .body(self.to_plain_text()),
            Representation::Html => Html(
                self.render_html(templates)
                    .map_err(InternalServerError)?,
            )
            .into_response(),
        })
    }
}
