use crate::domain::payment::{GatewayStatus, StatusReport};
use crate::error::{PaymentError, Result};
use crate::infrastructure::scripted::ScriptedStep;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum StepKind {
    Accept,
    Reject,
    Pending,
    Success,
    Failed,
    Cancelled,
    Error,
}

/// One row of a scenario file: `step, reference, text`.
#[derive(Debug, Deserialize)]
struct ScenarioRecord {
    step: StepKind,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl TryFrom<ScenarioRecord> for ScriptedStep {
    type Error = PaymentError;

    fn try_from(record: ScenarioRecord) -> Result<Self> {
        let status = |status, receipt_reference, reason_text| {
            ScriptedStep::Status(StatusReport {
                status,
                receipt_reference,
                reason_text,
            })
        };
        Ok(match record.step {
            StepKind::Accept => ScriptedStep::Accept {
                checkout_reference: record.reference.ok_or_else(|| {
                    PaymentError::ValidationError(
                        "accept step needs a checkout reference".to_string(),
                    )
                })?,
                prompt_message: record.text,
            },
            StepKind::Reject => ScriptedStep::Reject(
                record
                    .text
                    .unwrap_or_else(|| "STK push failed".to_string()),
            ),
            StepKind::Pending => status(GatewayStatus::Pending, None, None),
            StepKind::Success => status(GatewayStatus::Success, record.reference, None),
            StepKind::Failed => status(GatewayStatus::Failed, None, record.text),
            StepKind::Cancelled => status(GatewayStatus::Cancelled, None, record.text),
            StepKind::Error => ScriptedStep::TransientError(
                record
                    .text
                    .unwrap_or_else(|| "network error".to_string()),
            ),
        })
    }
}

/// Reads scripted gateway answers from a CSV source.
///
/// Columns are `step, reference, text`; the last two may be empty or absent.
/// `step` is one of `accept`, `reject`, `pending`, `success`, `failed`,
/// `cancelled`, `error`.
pub struct ScenarioReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ScenarioReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and converts each row.
    pub fn steps(self) -> impl Iterator<Item = Result<ScriptedStep>> {
        self.reader
            .into_deserialize::<ScenarioRecord>()
            .map(|result| -> Result<ScriptedStep> { ScriptedStep::try_from(result?) })
    }
}
