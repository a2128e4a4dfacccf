// CommandStack - Manages undo/redo stacks

use crate::command::Command;
use crate::command::trait_def::{CommandError, CommandResult, UndoableCommand};
use crate::messaging::{Notification, NotificationCategory, SignalBus};
use crate::sequencer::song::Song;
use crossbeam_channel::Receiver;
use std::collections::VecDeque;

/// Default maximum number of commands to keep in history
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Stack-changed notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSignal {
    pub can_undo: bool,
    pub can_redo: bool,
    pub undo_name: Option<String>,
    pub redo_name: Option<String>,
}

/// Executes commands and keeps the undo/redo history
///
/// The CommandStack maintains two stacks:
/// - Undo stack: Commands that have been executed and can be undone
/// - Redo stack: Commands that have been undone and can be redone
///
/// When a new command is executed:
/// 1. Execute the command
/// 2. Push it onto the undo stack
/// 3. Clear the redo stack (since we're on a new timeline)
///
/// Commands leaving the history (cleared redo branch, trimmed oldest entry)
/// are retired, handing anything they took out of the song to its reclaimer.
/// After every successful operation the song publishes a fresh snapshot.
pub struct CommandStack {
    /// Most recent at the back
    undo_stack: VecDeque<Command>,

    /// Most recent at the back
    redo_stack: VecDeque<Command>,

    max_history: usize,

    signals: SignalBus<StackSignal>,
}

impl CommandStack {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_HISTORY)
    }

    /// Create a CommandStack with a custom history limit
    pub fn with_capacity(max_history: usize) -> Self {
        Self {
            undo_stack: VecDeque::with_capacity(max_history),
            redo_stack: VecDeque::new(),
            max_history,
            signals: SignalBus::new(),
        }
    }

    /// Execute a command and add it to the undo stack
    ///
    /// # Errors
    /// Returns the command's error if it did not take effect; the history is
    /// left untouched and the command is dropped.
    pub fn execute(&mut self, command: impl Into<Command>, song: &mut Song) -> CommandResult<()> {
        let mut command = command.into();

        if let Err(e) = command.do_command(song) {
            if e.is_user_visible() {
                log::warn!("'{}' failed: {}", command.name(), e);
                song.notify(Notification::warning(
                    NotificationCategory::Command,
                    format!("{} failed: {}", command.name(), e),
                ));
            } else {
                log::debug!("'{}' ignored: {}", command.name(), e);
            }
            command.retire(song);
            return Err(e);
        }
        song.commit();
        log::debug!("Executed '{}'", command.name());

        // New timeline
        for mut undone in self.redo_stack.drain(..) {
            undone.retire(song);
        }

        self.undo_stack.push_back(command);
        while self.undo_stack.len() > self.max_history {
            if let Some(mut oldest) = self.undo_stack.pop_front() {
                oldest.retire(song);
            }
        }

        self.notify();
        Ok(())
    }

    /// Undo the last command, returning its name
    ///
    /// # Errors
    /// `NothingToUndo` on an empty history, or the command's error; a command
    /// whose undo failed stays on the undo stack.
    pub fn undo(&mut self, song: &mut Song) -> CommandResult<String> {
        let mut command = self.undo_stack.pop_back().ok_or(CommandError::NothingToUndo)?;
        let name = command.name().to_string();

        if let Err(e) = command.undo_command(song) {
            log::error!("Undo of '{}' failed: {}", name, e);
            self.undo_stack.push_back(command);
            song.commit();
            return Err(e);
        }
        song.commit();
        log::debug!("Undid '{}'", name);

        self.redo_stack.push_back(command);
        self.notify();
        Ok(name)
    }

    /// Redo the last undone command, returning its name
    ///
    /// # Errors
    /// `NothingToRedo` on an empty redo stack, or the command's error; a
    /// command that fails to redo stays on the redo stack.
    pub fn redo(&mut self, song: &mut Song) -> CommandResult<String> {
        let mut command = self.redo_stack.pop_back().ok_or(CommandError::NothingToRedo)?;
        let name = command.name().to_string();

        if let Err(e) = command.do_command(song) {
            log::warn!("Redo of '{}' failed: {}", name, e);
            song.notify(Notification::warning(
                NotificationCategory::Command,
                format!("Redo of {} failed: {}", name, e),
            ));
            self.redo_stack.push_back(command);
            return Err(e);
        }
        song.commit();
        log::debug!("Redid '{}'", name);

        self.undo_stack.push_back(command);
        self.notify();
        Ok(name)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Name of the command that would be undone
    pub fn undo_name(&self) -> Option<&str> {
        self.undo_stack.back().map(|cmd| cmd.name())
    }

    /// Name of the command that would be redone
    pub fn redo_name(&self) -> Option<&str> {
        self.redo_stack.back().map(|cmd| cmd.name())
    }

    /// Forget all history
    pub fn clear(&mut self, song: &mut Song) {
        for mut command in self.undo_stack.drain(..).chain(self.redo_stack.drain(..)) {
            command.retire(song);
        }
        self.notify();
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn subscribe(&mut self) -> Receiver<StackSignal> {
        self.signals.subscribe()
    }

    fn notify(&mut self) {
        let signal = StackSignal {
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
            undo_name: self.undo_name().map(str::to_string),
            redo_name: self.redo_name().map(str::to_string),
        };
        self.signals.emit(signal);
    }
}

impl Default for CommandStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::song_commands::{AddTempoChange, AddTrack, RemoveTrack, SetLoopStart};
    use crate::messaging::create_notification_channel;
    use ringbuf::traits::Consumer;

    #[test]
    fn test_execute_command() {
        let mut stack = CommandStack::new();
        let mut song = Song::new();

        stack.execute(AddTempoChange::new(4, 90.0), &mut song).unwrap();

        assert_eq!(song.tempo_at(4), Some(90.0));
        assert!(stack.can_undo());
        assert!(!stack.can_redo());
        assert_eq!(stack.undo_name(), Some("Set tempo change"));
    }

    #[test]
    fn test_undo() {
        let mut stack = CommandStack::new();
        let mut song = Song::new();

        stack.execute(AddTempoChange::new(4, 90.0), &mut song).unwrap();
        let name = stack.undo(&mut song).unwrap();

        assert_eq!(name, "Set tempo change");
        assert_eq!(song.tempo_at(4), None);
        assert!(!stack.can_undo());
        assert!(stack.can_redo());
    }

    #[test]
    fn test_redo() {
        let mut stack = CommandStack::new();
        let mut song = Song::new();

        stack.execute(AddTempoChange::new(4, 90.0), &mut song).unwrap();
        stack.undo(&mut song).unwrap();
        stack.redo(&mut song).unwrap();

        assert_eq!(song.tempo_at(4), Some(90.0));
        assert!(stack.can_undo());
        assert!(!stack.can_redo());
    }

    #[test]
    fn test_two_undos_restore_initial_state() {
        let mut stack = CommandStack::new();
        let mut song = Song::new();

        stack.execute(AddTempoChange::new(4, 90.0), &mut song).unwrap();
        stack.execute(SetLoopStart::new(Some(2)), &mut song).unwrap();
        stack.undo(&mut song).unwrap();
        stack.undo(&mut song).unwrap();

        assert_eq!(song.tempo_at(4), None);
        assert_eq!(song.loop_start(), None);
    }

    #[test]
    fn test_redo_stack_cleared_on_new_command() {
        let mut stack = CommandStack::new();
        let mut song = Song::new();

        stack.execute(AddTempoChange::new(1, 100.0), &mut song).unwrap();
        stack.execute(AddTempoChange::new(2, 110.0), &mut song).unwrap();
        stack.undo(&mut song).unwrap();
        assert!(stack.can_redo());

        stack.execute(AddTempoChange::new(3, 120.0), &mut song).unwrap();
        assert!(!stack.can_redo());
        assert_eq!(stack.redo(&mut song), Err(CommandError::NothingToRedo));
        assert_eq!(song.tempo_at(2), None);
    }

    #[test]
    fn test_failed_command_leaves_history_untouched() {
        let mut stack = CommandStack::new();
        let mut song = Song::new();

        stack.execute(AddTempoChange::new(1, 100.0), &mut song).unwrap();
        stack.undo(&mut song).unwrap();

        let beyond = song.length() + 1;
        assert!(stack.execute(SetLoopStart::new(Some(beyond)), &mut song).is_err());
        assert_eq!(stack.undo_count(), 0);
        assert_eq!(stack.redo_count(), 1);
    }

    #[test]
    fn test_history_limit() {
        let mut stack = CommandStack::with_capacity(10);
        let mut song = Song::new();

        for beat in 1..=20 {
            stack
                .execute(AddTempoChange::new(beat, 100.0 + beat as f64), &mut song)
                .unwrap();
        }

        assert_eq!(stack.undo_count(), 10);
        assert_eq!(stack.max_history(), 10);
    }

    #[test]
    fn test_trimmed_command_is_retired() {
        let mut stack = CommandStack::with_capacity(1);
        let mut song = Song::new();
        let track = song.add_track("Gone");
        song.commit();

        stack.execute(RemoveTrack::new(track), &mut song).unwrap();
        let pending = song.pending_garbage();
        stack.execute(AddTrack::new("Next"), &mut song).unwrap();

        // The removed track and the replaced snapshot
        assert_eq!(song.pending_garbage(), pending + 2);
    }

    #[test]
    fn test_undo_with_empty_stack() {
        let mut stack = CommandStack::new();
        let mut song = Song::new();

        assert_eq!(stack.undo(&mut song), Err(CommandError::NothingToUndo));
    }

    #[test]
    fn test_redo_with_empty_stack() {
        let mut stack = CommandStack::new();
        let mut song = Song::new();

        assert_eq!(stack.redo(&mut song), Err(CommandError::NothingToRedo));
    }

    #[test]
    fn test_failures_reach_notification_channel() {
        let mut stack = CommandStack::new();
        let mut song = Song::new();
        let (tx, mut rx) = create_notification_channel(4);
        song.set_notification_producer(tx);

        let beyond = song.length() + 1;
        assert!(stack.execute(SetLoopStart::new(Some(beyond)), &mut song).is_err());
        let notification = rx.try_pop().unwrap();
        assert_eq!(notification.category, NotificationCategory::Command);
        assert!(notification.message.starts_with("Set loop start failed"));

        // Ignored edits stay quiet
        stack.execute(AddTempoChange::new(4, 90.0), &mut song).unwrap();
        assert!(stack.execute(AddTempoChange::new(4, 90.0), &mut song).is_err());
        assert!(rx.try_pop().is_none());
    }

    #[test]
    fn test_stack_signal() {
        let mut stack = CommandStack::new();
        let mut song = Song::new();
        let rx = stack.subscribe();

        stack.execute(AddTempoChange::new(4, 90.0), &mut song).unwrap();
        let signal = rx.try_recv().unwrap();
        assert!(signal.can_undo);
        assert!(!signal.can_redo);
        assert_eq!(signal.undo_name.as_deref(), Some("Set tempo change"));

        // Failures do not notify
        assert!(stack.execute(AddTempoChange::new(4, 90.0), &mut song).is_err());
        assert!(rx.try_recv().is_err());

        stack.undo(&mut song).unwrap();
        let signal = rx.try_recv().unwrap();
        assert!(signal.can_redo);
        assert_eq!(signal.redo_name.as_deref(), Some("Set tempo change"));
    }

    #[test]
    fn test_clear() {
        let mut stack = CommandStack::new();
        let mut song = Song::new();

        stack.execute(AddTempoChange::new(4, 90.0), &mut song).unwrap();
        stack.execute(AddTempoChange::new(5, 95.0), &mut song).unwrap();
        stack.undo(&mut song).unwrap();
        stack.clear(&mut song);

        assert!(!stack.can_undo());
        assert!(!stack.can_redo());
        assert_eq!(song.tempo_at(4), Some(90.0));
    }
}
