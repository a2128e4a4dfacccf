// CompoundCommand - an ordered group of commands applied as one edit

use crate::command::Command;
use crate::command::trait_def::{CommandResult, UndoableCommand};
use crate::sequencer::song::Song;

/// Runs its children in order and undoes them in reverse
///
/// If a child fails, the children that already ran are undone before the
/// error is returned, so the song is left as it was.
pub struct CompoundCommand {
    name: String,
    children: Vec<Command>,
}

impl CompoundCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    pub fn append(&mut self, command: impl Into<Command>) {
        self.children.push(command.into());
    }

    /// Drop every child, handing what they hold to the song's reclaimer
    pub fn clear(&mut self, song: &mut Song) {
        for mut child in self.children.drain(..) {
            child.retire(song);
        }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn children(&self) -> &[Command] {
        &self.children
    }
}

impl UndoableCommand for CompoundCommand {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        for i in 0..self.children.len() {
            if let Err(e) = self.children[i].do_command(song) {
                for child in self.children[..i].iter_mut().rev() {
                    if let Err(undo) = child.undo_command(song) {
                        log::error!("{}: rollback of '{}' failed: {}", self.name, child.name(), undo);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let count = self.children.len();
        for i in (0..count).rev() {
            if let Err(e) = self.children[i].undo_command(song) {
                // Put back what was already undone
                for child in self.children[i + 1..].iter_mut() {
                    if let Err(redo) = child.do_command(song) {
                        log::error!("{}: restore of '{}' failed: {}", self.name, child.name(), redo);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn retire(&mut self, song: &mut Song) {
        self.clear(song);
    }
}
