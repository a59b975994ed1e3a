use law_journal_domain::config::WorkflowConfig;
use law_journal_domain::notification::{
    NotificationError, PaymentCode, PaymentCodes, PaymentRequest,
};
use reqwest::Url;

const QR_SIZE: &str = "220x220";

/// Builds a UPI deep link and points an external QR service at it.
#[derive(Debug, Clone)]
pub struct UpiQrCodes {
    qr_service_url: String,
}

impl UpiQrCodes {
    pub fn new(qr_service_url: impl Into<String>) -> Self {
        Self {
            qr_service_url: qr_service_url.into(),
        }
    }

    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self::new(config.qr_service_url())
    }
}

impl PaymentCodes for UpiQrCodes {
    fn payment_code(&self, request: &PaymentRequest) -> Result<PaymentCode, NotificationError> {
        let amount = format!("{}.00", request.amount);
        let uri = Url::parse_with_params(
            "upi://pay",
            &[
                ("pa", request.payee_address.as_str()),
                ("pn", request.payee_name.as_str()),
                ("am", amount.as_str()),
                ("cu", "INR"),
                ("tn", request.note.as_str()),
            ],
        )
        .map_err(|err| NotificationError::PaymentCode(err.to_string()))?;

        let image = Url::parse_with_params(
            &self.qr_service_url,
            &[("size", QR_SIZE), ("data", uri.as_str())],
        )
        .map_err(|err| NotificationError::PaymentCode(err.to_string()))?;

        Ok(PaymentCode {
            payment_uri: uri.into(),
            qr_image_url: image.into(),
        })
    }
}
