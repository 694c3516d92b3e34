use serde::Deserialize;
use serde::Serialize;

/// User-facing texts. Every field can be overridden from the `[replies]`
/// table in `config.toml`; missing fields keep the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Replies {
    pub greeting: String,
    pub reprompt: String,
    pub invalid_receipt: String,
    pub inconsistent: String,
    pub duplicate: String,
    pub accepted: String,
    pub password_prompt: String,
    pub wrong_password: String,
    pub storage_failure: String,
}

impl Default for Replies {
    fn default() -> Self {
        Self {
            greeting: "Добро пожаловать! Отправьте чек об оплате.".to_string(),
            reprompt: "Отправьте чек в формате PDF или фотографию чека.".to_string(),
            invalid_receipt: "Этот чек не корректен.".to_string(),
            inconsistent: "Данные чека не соответствуют.".to_string(),
            duplicate: "Данный чек уже был отправлен.".to_string(),
            accepted: "Чек валидирован, доступ открыт.".to_string(),
            password_prompt: "Введите пароль.".to_string(),
            wrong_password: "Неправильный пароль.".to_string(),
            storage_failure: "Не удалось сохранить чек, попробуйте позже.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_override_keeps_defaults() {
        let replies: Replies = toml::from_str(r#"duplicate = "Already submitted.""#).expect("toml");
        assert_eq!(replies.duplicate, "Already submitted.");
        assert_eq!(replies.accepted, Replies::default().accepted);
    }
}
