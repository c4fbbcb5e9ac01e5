use std::path::Path;

use log::debug;
use tera::Tera;

use crate::error::StartupError;

pub const TEMPLATE_NAME: &str = "template.html";

/// Loads every `*.html` file in `dir`. The visitor page template has to be among them.
pub fn load(dir: &Path) -> Result<Tera, StartupError> {
    let glob = dir.join("*.html");
    let tera = Tera::new(&glob.to_string_lossy()).map_err(|source| StartupError::TemplateLoad {
        dir: dir.to_owned(),
        source,
    })?;

    let names = tera.get_template_names().collect::<Vec<_>>();
    debug!("Loaded templates from {}: {:?}", dir.display(), names);

    if !names.contains(&TEMPLATE_NAME) {
        return Err(StartupError::TemplateMissing {
            dir: dir.to_owned(),
            name: TEMPLATE_NAME,
        });
    }

    Ok(tera)
}
