//! Type-name → implementation maps for instructions and triggers.
//!
//! Both registries are filled through `EngineBuilder` and frozen once the
//! engine is built.

use std::collections::HashMap;
use std::sync::Arc;

use instructions::Instruction;

use crate::trigger::Trigger;
use crate::EngineError;

fn check_name(kind: &str, name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidRegistration(format!(
            "{kind} type name must not be empty"
        )));
    }
    Ok(())
}

#[derive(Default)]
pub struct InstructionRegistry {
    instructions: HashMap<String, Arc<dyn Instruction>>,
}

impl InstructionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        instruction: Arc<dyn Instruction>,
    ) -> Result<(), EngineError> {
        let name = name.into();
        check_name("instruction", &name)?;
        if self.instructions.contains_key(&name) {
            return Err(EngineError::DuplicateInstruction(name));
        }
        self.instructions.insert(name, instruction);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Instruction>, EngineError> {
        self.instructions
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownInstruction(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

#[derive(Default)]
pub struct TriggerRegistry {
    triggers: HashMap<String, Arc<dyn Trigger>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        trigger: Arc<dyn Trigger>,
    ) -> Result<(), EngineError> {
        let name = name.into();
        check_name("trigger", &name)?;
        if self.triggers.contains_key(&name) {
            return Err(EngineError::DuplicateTrigger(name));
        }
        self.triggers.insert(name, trigger);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Trigger>, EngineError> {
        self.triggers
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTrigger(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}
