use log::error;

use crate::message::Message;
use crate::notices::Notice;

use super::App;

impl App {
    pub(super) fn update(&mut self, message: Message) {
        match message {
            Message::UpdateChecked { result, prompt } => self.handle_update_checked(*result, prompt),
            Message::UpdateProgress(progress) => self.handle_update_progress(progress),
            Message::UpdatePrepared(result) => self.handle_update_prepared(*result),
            Message::TaskFailed(error) => {
                error!("{error}");
                if self.update_phase.is_busy() {
                    self.fail_update(error);
                } else {
                    self.notify(Notice::error(error.to_string()));
                }
            }
        }
    }
}
