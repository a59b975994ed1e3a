use chrono::{DateTime, Utc};

use crate::model::{EmailKind, OutboundEmail};

/// Rendered payment instructions embedded in approval mails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCode {
    pub payment_uri: String,
    pub qr_image_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalNotice {
    pub author_name: String,
    pub article_title: String,
    pub payment_link: String,
    pub expires_at: DateTime<Utc>,
    pub fee: u64,
    pub payee_name: String,
    pub payment: PaymentCode,
}

/// State-triggered messages the journal sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Approval(ApprovalNotice),
    ResendApproval(ApprovalNotice),
    Rejection {
        author_name: String,
        article_title: String,
        reason: String,
    },
    Published {
        author_name: String,
        article_title: String,
        article_url: String,
    },
    CoAuthorInvite {
        invitee_name: String,
        inviter_name: String,
        article_title: String,
        article_url: String,
    },
}

impl Notice {
    pub fn kind(&self) -> EmailKind {
        match self {
            Notice::Approval(_) => EmailKind::Approval,
            Notice::ResendApproval(_) => EmailKind::ResendApproval,
            Notice::Rejection { .. } => EmailKind::Rejection,
            Notice::Published { .. } => EmailKind::Published,
            Notice::CoAuthorInvite { .. } => EmailKind::CoAuthorInvite,
        }
    }

    pub fn render(&self, recipient: &str, journal_name: &str) -> OutboundEmail {
        let (subject, paragraphs, action) = match self {
            Notice::Approval(notice) => approval_body(notice, false),
            Notice::ResendApproval(notice) => approval_body(notice, true),
            Notice::Rejection {
                author_name,
                article_title,
                reason,
            } => (
                format!("Your submission \"{article_title}\" was not accepted"),
                vec![
                    format!("Dear {author_name},"),
                    format!(
                        "Thank you for submitting \"{article_title}\". After review, the editorial board has decided not to accept it for publication."
                    ),
                    format!("Reviewer note: {reason}"),
                ],
                None,
            ),
            Notice::Published {
                author_name,
                article_title,
                article_url,
            } => (
                format!("\"{article_title}\" is now published"),
                vec![
                    format!("Dear {author_name},"),
                    format!(
                        "We have verified your payment and \"{article_title}\" is now live."
                    ),
                ],
                Some(("Read the article", article_url.clone())),
            ),
            Notice::CoAuthorInvite {
                invitee_name,
                inviter_name,
                article_title,
                article_url,
            } => (
                format!("You have been added as a co-author of \"{article_title}\""),
                vec![
                    format!("Dear {invitee_name},"),
                    format!(
                        "{inviter_name} has listed you as a co-author of \"{article_title}\"."
                    ),
                    "If you were not expecting this, you can ignore this message.".to_string(),
                ],
                Some(("View the submission", article_url.clone())),
            ),
        };

        let image = match self {
            Notice::Approval(notice) | Notice::ResendApproval(notice) => {
                Some(notice.payment.qr_image_url.as_str())
            }
            _ => None,
        };

        OutboundEmail {
            kind: self.kind(),
            recipient: recipient.to_string(),
            subject: format!("[{journal_name}] {subject}"),
            html_body: render_html(journal_name, &paragraphs, action.as_ref(), image),
            text_body: render_text(journal_name, &paragraphs, action.as_ref()),
        }
    }
}

type Body = (String, Vec<String>, Option<(&'static str, String)>);

fn approval_body(notice: &ApprovalNotice, resend: bool) -> Body {
    let ApprovalNotice {
        author_name,
        article_title,
        payment_link,
        expires_at,
        fee,
        payee_name,
        payment,
    } = notice;
    let subject = if resend {
        format!("Reminder: complete payment for \"{article_title}\"")
    } else {
        format!("\"{article_title}\" has been approved")
    };
    let mut paragraphs = vec![format!("Dear {author_name},")];
    if resend {
        paragraphs.push(format!(
            "This is a fresh payment link for your approved article \"{article_title}\". Earlier links may no longer work."
        ));
    } else {
        paragraphs.push(format!(
            "Congratulations! \"{article_title}\" has been approved for publication."
        ));
    }
    paragraphs.push(format!(
        "Please pay the publication fee of INR {fee} to {payee_name} by scanning the QR code or using {}.",
        payment.payment_uri
    ));
    paragraphs.push(format!(
        "Then submit the UTR (transaction reference) through the link below. The link expires on {} UTC and works once.",
        expires_at.format("%d %b %Y %H:%M")
    ));
    (subject, paragraphs, Some(("Submit payment details", payment_link.clone())))
}

fn render_text(journal_name: &str, paragraphs: &[String], action: Option<&(&str, String)>) -> String {
    let mut out = String::new();
    for paragraph in paragraphs {
        out.push_str(paragraph);
        out.push_str("\n\n");
    }
    if let Some((label, url)) = action {
        out.push_str(&format!("{label}: {url}\n\n"));
    }
    out.push_str(&format!("-- \n{journal_name} Editorial Board\n"));
    out
}

fn render_html(
    journal_name: &str,
    paragraphs: &[String],
    action: Option<&(&str, String)>,
    image: Option<&str>,
) -> String {
    let mut out = String::from("<!DOCTYPE html><html><body style=\"font-family:Georgia,serif\">");
    out.push_str(&format!("<h2>{}</h2>", escape_html(journal_name)));
    for paragraph in paragraphs {
        out.push_str(&format!("<p>{}</p>", escape_html(paragraph)));
    }
    if let Some(src) = image {
        out.push_str(&format!(
            "<p><img src=\"{}\" alt=\"Payment QR code\" width=\"220\" height=\"220\"></p>",
            escape_html(src)
        ));
    }
    if let Some((label, url)) = action {
        out.push_str(&format!(
            "<p><a href=\"{}\">{}</a></p>",
            escape_html(url),
            escape_html(label)
        ));
    }
    out.push_str(&format!(
        "<p>{} Editorial Board</p></body></html>",
        escape_html(journal_name)
    ));
    out
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approval() -> ApprovalNotice {
        ApprovalNotice {
            author_name: "Asha".into(),
            article_title: "Privacy & <Data>".into(),
            payment_link: "https://journal.example/payment?token=abc".into(),
            expires_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            fee: 1500,
            payee_name: "Journal Trust".into(),
            payment: PaymentCode {
                payment_uri: "upi://pay?pa=journal@upi".into(),
                qr_image_url: "https://qr.example/?data=x&size=220".into(),
            },
        }
    }

    #[test]
    fn approval_mail_carries_link_fee_and_qr() {
        let email = Notice::Approval(approval()).render("asha@example.com", "Law Review");
        assert_eq!(email.kind, EmailKind::Approval);
        assert_eq!(email.recipient, "asha@example.com");
        assert!(email.subject.starts_with("[Law Review]"));
        assert!(email.text_body.contains("https://journal.example/payment?token=abc"));
        assert!(email.text_body.contains("INR 1500"));
        assert!(email.html_body.contains("https://qr.example/?data=x&amp;size=220"));
    }

    #[test]
    fn html_body_escapes_titles() {
        let email = Notice::Approval(approval()).render("a@example.com", "Law Review");
        assert!(email.html_body.contains("Privacy &amp; &lt;Data&gt;"));
        assert!(!email.html_body.contains("<Data>"));
    }

    #[test]
    fn resend_uses_reminder_subject() {
        let email = Notice::ResendApproval(approval()).render("a@example.com", "Law Review");
        assert_eq!(email.kind, EmailKind::ResendApproval);
        assert!(email.subject.contains("Reminder"));
    }

    #[test]
    fn rejection_mail_includes_reason_without_qr() {
        let email = Notice::Rejection {
            author_name: "Asha".into(),
            article_title: "Title".into(),
            reason: "Needs stronger citations".into(),
        }
        .render("a@example.com", "Law Review");
        assert!(email.text_body.contains("Needs stronger citations"));
        assert!(!email.html_body.contains("<img"));
    }
}
