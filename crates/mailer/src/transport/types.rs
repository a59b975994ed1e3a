use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailAddress {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// JSON body accepted by the mail provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendMailRequest {
    pub from: MailAddress,
    pub to: Vec<MailAddress>,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProviderErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}
