//! Response parser - chunked model text to batch control calls
//!
//! Lines are processed as soon as they are complete. A malformed header, a
//! command before any header, or free text puts the parser into "ignore until
//! next header" mode; errors never abort the stream.

use crate::command::BatchControl;
use picar_shared::codec::{CodecError, Line, LineAssembler, LineClassifier};
use picar_shared::BatchId;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Directive asking the application to re-prompt the model; never executed
pub const CONTINUE_DIRECTIVE: &str = "CONTINUE";

pub struct ResponseParser {
    control: Arc<dyn BatchControl>,
    classifier: LineClassifier,
    assembler: LineAssembler,
    /// Batch the following command lines belong to
    current_batch: Option<BatchId>,
    ignore_until_header: bool,
    continue_requested: bool,
}

impl ResponseParser {
    pub fn new(control: Arc<dyn BatchControl>) -> Result<Self, CodecError> {
        Ok(Self {
            control,
            classifier: LineClassifier::new()?,
            assembler: LineAssembler::new(),
            current_batch: None,
            ignore_until_header: false,
            continue_requested: false,
        })
    }

    /// Feed a chunk of model output
    pub fn add(&mut self, chunk: &str) {
        self.assembler.push(chunk);
        while let Some(line) = self.assembler.next_line() {
            self.process_line(&line);
        }
    }

    /// End of the model's turn
    ///
    /// Flushes the partial last line, closes the open batch and returns
    /// whether CONTINUE was seen since the previous call.
    pub fn finish(&mut self) -> bool {
        if let Some(rest) = self.assembler.take_remainder() {
            self.process_line(&rest);
        }

        if let Some(batch_id) = self.current_batch.take() {
            debug!("[PARSER] Closing batch {}", batch_id);
            if let Err(e) = self.control.finish_batch() {
                warn!("[PARSER] Failed to finish batch {}: {}", batch_id, e);
            }
        }
        self.ignore_until_header = false;

        std::mem::take(&mut self.continue_requested)
    }

    /// Batch id of the last valid header, until `finish`
    pub fn current_batch(&self) -> Option<BatchId> {
        self.current_batch
    }

    pub fn is_ignoring(&self) -> bool {
        self.ignore_until_header
    }

    /// Bytes of the partial line waiting for its newline
    pub fn buffered(&self) -> usize {
        self.assembler.buffer_len()
    }

    fn process_line(&mut self, raw: &str) {
        match self.classifier.classify(raw) {
            Line::Blank => {}

            Line::Header(Ok(batch_id)) => {
                info!("[PARSER] Batch {} header", batch_id);
                self.current_batch = Some(batch_id);
                self.ignore_until_header = false;
                if let Err(e) = self.control.start_batch(batch_id) {
                    warn!("[PARSER] Failed to start batch {}: {}", batch_id, e);
                }
            }

            Line::Header(Err(e)) => {
                warn!("[PARSER] Malformed batch header ({}), ignoring until next header", e);
                self.ignore_until_header = true;
            }

            _ if self.ignore_until_header => {
                debug!("[PARSER] Ignored: {:?}", raw.trim());
            }

            Line::Command(command) => {
                if self.current_batch.is_none() {
                    warn!(
                        "[PARSER] Command before any batch header ({}), ignoring until next header",
                        command
                    );
                    self.ignore_until_header = true;
                    return;
                }

                if command.is(CONTINUE_DIRECTIVE) {
                    debug!("[PARSER] CONTINUE requested");
                    self.continue_requested = true;
                    return;
                }

                if let Err(e) = self.control.enqueue_command(command) {
                    warn!("[PARSER] Failed to enqueue command: {}", e);
                }
            }

            Line::Text(text) => {
                warn!(
                    "[PARSER] Free text outside a command line ({:?}), ignoring until next header",
                    text
                );
                self.ignore_until_header = true;
            }
        }
    }
}
