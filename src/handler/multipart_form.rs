use std::collections::HashMap;
use axum::extract::Multipart;
use bytes::Bytes;
use log::error;

pub const FILE_FIELD: &str = "file";

/// Upload body: the image part plus every text field.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub file: Option<Bytes>,
    pub fields: HashMap<String, String>,
}

impl MultipartForm {
    pub async fn read(payload: &mut Multipart) -> Result<Self, String> {
        let mut form = MultipartForm::default();
        loop {
            let field = match payload.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => {
                    error!("failed to read multipart body: {e}");
                    return Err("malformed multipart body".to_string());
                }
            };
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if name == FILE_FIELD {
                match field.bytes().await {
                    Ok(data) => form.file = Some(data),
                    Err(e) => {
                        error!("failed to retrieve image from request: {e}");
                        return Err("failed to process image".to_string());
                    }
                }
            } else {
                match field.text().await {
                    Ok(value) => {
                        form.fields.insert(name, value);
                    }
                    Err(e) => {
                        error!("failed to read field {name}: {e}");
                        return Err(format!("invalid value for `{name}`"));
                    }
                }
            }
        }
        Ok(form)
    }

    pub fn image(&self) -> Result<Bytes, String> {
        match &self.file {
            Some(data) if !data.is_empty() => Ok(data.clone()),
            Some(_) => Err("image is empty".to_string()),
            None => Err(format!("missing `{FILE_FIELD}` field")),
        }
    }

    pub fn required(&self, name: &str) -> Result<String, String> {
        self.optional(name).ok_or_else(|| format!("missing `{name}` field"))
    }

    pub fn optional(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_and_optional_fields() {
        let mut form = MultipartForm::default();
        form.fields.insert("gesture".into(), " blink ".into());
        form.fields.insert("identity".into(), "  ".into());
        assert_eq!(form.required("gesture").unwrap(), "blink");
        assert!(form.optional("identity").is_none());
        assert_eq!(form.required("session_id").unwrap_err(), "missing `session_id` field");
    }

    #[test]
    fn test_image_presence() {
        let mut form = MultipartForm::default();
        assert!(form.image().is_err());
        form.file = Some(Bytes::new());
        assert_eq!(form.image().unwrap_err(), "image is empty");
        form.file = Some(Bytes::from_static(b"png"));
        assert_eq!(form.image().unwrap(), Bytes::from_static(b"png"));
    }
}
