use crate::error::NotesError;
use crate::session::{NotesAction, NotesStore};
use crate::shell::{SessionShell, ShellEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

enum NotesCmd {
    Edit(String),
    Flush(oneshot::Sender<Result<(), NotesError>>),
}

/// Заметки сессии: запись уходит после паузы и только если текст изменился.
/// Последняя запись побеждает.
pub struct NotesWidget {
    session_id: String,
    draft: Arc<Mutex<String>>,
    tx: mpsc::UnboundedSender<NotesCmd>,
    task: Option<JoinHandle<()>>,
}

struct Saver {
    session_id: String,
    store: Arc<dyn NotesStore>,
    shell: Arc<dyn SessionShell>,
    draft: Arc<Mutex<String>>,
    persisted: String,
}

impl Saver {
    async fn persist(&mut self) -> Result<(), NotesError> {
        let draft = self.draft.lock().clone();
        if draft == self.persisted {
            return Ok(());
        }
        match self
            .store
            .update_notes(&self.session_id, NotesAction::UpdateNotes, &draft)
            .await
        {
            Ok(()) => {
                debug!(session_id = %self.session_id, len = draft.len(), "notes saved");
                self.persisted = draft;
                self.shell.emit(ShellEvent::NotesSaved);
                Ok(())
            }
            Err(e) => {
                // черновик остаётся, следующая правка или flush повторит запись
                error!(session_id = %self.session_id, "failed to save notes: {}", e);
                self.shell.emit(ShellEvent::NotesSaveFailed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<NotesCmd>, debounce: Duration) {
        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(NotesCmd::Edit(text)) => {
                        *self.draft.lock() = text;
                        deadline = Some(Instant::now() + debounce);
                    }
                    Some(NotesCmd::Flush(reply)) => {
                        deadline = None;
                        let _ = reply.send(self.persist().await);
                    }
                    None => {
                        if deadline.is_some() {
                            let _ = self.persist().await;
                        }
                        break;
                    }
                },
                _ = async {
                    if let Some(at) = deadline {
                        sleep_until(at).await;
                    }
                }, if deadline.is_some() => {
                    deadline = None;
                    let _ = self.persist().await;
                }
            }
        }
        debug!(session_id = %self.session_id, "notes saver stopped");
    }
}

impl NotesWidget {
    /// `initial`: значение с сервера, оно же считается уже сохранённым
    pub fn open(
        session_id: impl Into<String>,
        initial: impl Into<String>,
        store: Arc<dyn NotesStore>,
        shell: Arc<dyn SessionShell>,
        debounce: Duration,
    ) -> Self {
        let session_id = session_id.into();
        let initial = initial.into();
        let draft = Arc::new(Mutex::new(initial.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        let saver = Saver {
            session_id: session_id.clone(),
            store,
            shell,
            draft: draft.clone(),
            persisted: initial,
        };
        let task = tokio::spawn(saver.run(rx, debounce));
        info!(%session_id, ?debounce, "notes widget opened");
        Self {
            session_id,
            draft,
            tx,
            task: Some(task),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Текущий текст редактора (может быть ещё не сохранён)
    pub fn draft(&self) -> String {
        self.draft.lock().clone()
    }

    pub fn edit(&self, text: impl Into<String>) -> Result<(), NotesError> {
        let text = text.into();
        // редактор показывает правку сразу, не дожидаясь задачи
        *self.draft.lock() = text.clone();
        self.tx
            .send(NotesCmd::Edit(text))
            .map_err(|_| NotesError::Closed)
    }

    /// Сохранить немедленно, минуя паузу
    pub async fn flush(&self) -> Result<(), NotesError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(NotesCmd::Flush(reply))
            .map_err(|_| NotesError::Closed)?;
        rx.await.map_err(|_| NotesError::Closed)?
    }

    /// Сохраняет несохранённое и останавливает задачу
    pub async fn close(mut self) -> Result<(), NotesError> {
        let result = self.flush().await;
        if let Some(task) = self.task.take() {
            drop(self);
            let _ = task.await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{InMemorySessionStore, SessionRecord};
    use crate::testing::RecordingShell;
    use async_trait::async_trait;

    const DEBOUNCE: Duration = Duration::from_millis(1000);

    fn store() -> Arc<InMemorySessionStore> {
        let store = InMemorySessionStore::new();
        store.insert(SessionRecord {
            session_id: "xyz".into(),
            mentor_identity: "a@example.com".into(),
            mentee_identity: "b@example.com".into(),
            notes: "agenda".into(),
        });
        Arc::new(store)
    }

    fn texts(store: &InMemorySessionStore) -> Vec<String> {
        store.note_writes().into_iter().map(|(_, _, text)| text).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_edits_are_coalesced() {
        let store = store();
        let shell = RecordingShell::new();
        let notes = NotesWidget::open("xyz", "agenda", store.clone(), shell.clone(), DEBOUNCE);

        notes.edit("agenda 1").unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        notes.edit("agenda 1 2").unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        notes.edit("agenda 1 2 3").unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(store.note_writes().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(texts(&store), vec!["agenda 1 2 3"]);
        assert_eq!(store.get("xyz").unwrap().notes, "agenda 1 2 3");
        assert_eq!(shell.count(|e| *e == ShellEvent::NotesSaved), 1);
        assert_eq!(store.note_writes()[0].1, NotesAction::UpdateNotes);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_text_is_not_written() {
        let store = store();
        let notes = NotesWidget::open("xyz", "agenda", store.clone(), RecordingShell::new(), DEBOUNCE);

        notes.edit("agenda!").unwrap();
        notes.edit("agenda").unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.note_writes().is_empty());

        notes.edit("new").unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        notes.flush().await.unwrap();
        assert_eq!(texts(&store), vec!["new"]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_flushes_pending_draft() {
        let store = store();
        let notes = NotesWidget::open("xyz", "agenda", store.clone(), RecordingShell::new(), DEBOUNCE);

        notes.edit("last words").unwrap();
        notes.close().await.unwrap();
        assert_eq!(texts(&store), vec!["last words"]);
    }

    struct BrokenStore;

    #[async_trait]
    impl NotesStore for BrokenStore {
        async fn update_notes(
            &self,
            _session_id: &str,
            _action: NotesAction,
            _notes: &str,
        ) -> Result<(), NotesError> {
            Err(NotesError::Store("database is down".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_keeps_the_draft() {
        let shell = RecordingShell::new();
        let notes = NotesWidget::open("xyz", "agenda", Arc::new(BrokenStore), shell.clone(), DEBOUNCE);

        notes.edit("unsaved").unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(notes.draft(), "unsaved");
        assert_eq!(
            shell.count(|e| matches!(e, ShellEvent::NotesSaveFailed(_))),
            1
        );
        assert!(matches!(notes.flush().await, Err(NotesError::Store(_))));
    }
}
