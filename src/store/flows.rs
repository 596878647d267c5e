//! Flow store: an in-memory set of `Flow`s keyed by id, plus a single
//! "selected flow" pointer. Grounded on `storage/mod.rs`'s
//! singleton-registry shape (init-once, `Arc`-shared handle) and its CRUD
//! naming from `transaction_store.rs`.

use crate::error::NotFoundError;
use crate::models::{ChefAction, ChefStep, Flow, FlowStep, StepKind, VariableMap};
use std::sync::RwLock;
use uuid::Uuid;

struct Inner {
    flows: Vec<Flow>,
    selected: Option<Uuid>,
}

pub struct FlowStore {
    inner: RwLock<Inner>,
}

impl Default for FlowStore {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                flows: Vec::new(),
                selected: None,
            }),
        }
    }
}

impl FlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, name: Option<String>) -> Flow {
        let mut inner = self.inner.write().unwrap();
        let next_number = inner.flows.len() + 1;
        let name = name.unwrap_or_else(|| format!("Flow {next_number}"));
        let sorting_index = inner.flows.len() as u32 + 1;
        let flow = Flow::new(name, sorting_index);
        inner.flows.push(flow.clone());
        if inner.selected.is_none() {
            inner.selected = Some(flow.id);
        }
        flow
    }

    pub fn delete(&self, id: Uuid) -> Result<(), NotFoundError> {
        let mut inner = self.inner.write().unwrap();
        let before = inner.flows.len();
        inner.flows.retain(|f| f.id != id);
        if inner.flows.len() == before {
            return Err(NotFoundError::Flow(id.to_string()));
        }
        renumber(&mut inner.flows);

        if inner.selected == Some(id) {
            inner.selected = inner
                .flows
                .iter()
                .min_by_key(|f| f.sorting_index)
                .map(|f| f.id);
        }
        Ok(())
    }

    pub fn rename(&self, id: Uuid, name: String) -> Result<Flow, NotFoundError> {
        self.mutate(id, |flow| flow.name = name)
    }

    pub fn duplicate(&self, id: Uuid) -> Result<Flow, NotFoundError> {
        let mut inner = self.inner.write().unwrap();
        let source = inner
            .flows
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or_else(|| NotFoundError::Flow(id.to_string()))?;

        let mut copy = source.clone();
        copy.id = Uuid::new_v4();
        copy.name = format!("{} (copy)", source.name);
        copy.sorting_index = inner.flows.len() as u32 + 1;
        copy.execution_results.clear();
        for step in &mut copy.steps {
            step.id = Uuid::new_v4();
        }
        inner.flows.push(copy.clone());
        Ok(copy)
    }

    /// Sorted by `sorting_index`, dense `1..N` — re-derived on every
    /// mutation rather than trusted as an invariant some caller might
    /// violate.
    pub fn list(&self) -> Vec<Flow> {
        let inner = self.inner.read().unwrap();
        let mut flows = inner.flows.clone();
        flows.sort_by_key(|f| f.sorting_index);
        flows
    }

    pub fn get(&self, id: Uuid) -> Result<Flow, NotFoundError> {
        self.inner
            .read()
            .unwrap()
            .flows
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or_else(|| NotFoundError::Flow(id.to_string()))
    }

    /// Replace a flow wholesale. The external project writer that would
    /// persist this to disk is out of scope (spec §1).
    pub fn update(&self, flow: Flow) -> Result<Flow, NotFoundError> {
        let mut inner = self.inner.write().unwrap();
        let slot = inner
            .flows
            .iter_mut()
            .find(|f| f.id == flow.id)
            .ok_or_else(|| NotFoundError::Flow(flow.id.to_string()))?;
        *slot = flow.clone();
        Ok(flow)
    }

    pub fn add_step(&self, id: Uuid, step: FlowStep) -> Result<Flow, NotFoundError> {
        self.mutate(id, |flow| flow.steps.push(step))
    }

    pub fn insert_step(&self, id: Uuid, step: FlowStep, position: usize) -> Result<Flow, NotFoundError> {
        self.mutate(id, |flow| {
            let at = position.min(flow.steps.len());
            flow.steps.insert(at, step);
        })
    }

    pub fn delete_step(&self, id: Uuid, index: usize) -> Result<Flow, NotFoundError> {
        self.mutate(id, |flow| {
            if index < flow.steps.len() {
                flow.steps.remove(index);
            }
        })
    }

    /// Paste a previously copied request step (e.g. via the interception
    /// engine's `copy_to_current_flow`) at `position`.
    pub fn paste_request_at(
        &self,
        id: Uuid,
        position: usize,
        request_step: crate::models::RequestStep,
    ) -> Result<Flow, NotFoundError> {
        let step = FlowStep::request("Pasted request", request_step);
        self.insert_step(id, step, position)
    }

    pub fn update_chef_step(&self, id: Uuid, step_id: Uuid, chef: ChefStep) -> Result<Flow, NotFoundError> {
        self.mutate(id, |flow| {
            if let Some(step) = flow.steps.iter_mut().find(|s| s.id == step_id && s.kind == StepKind::Chef) {
                step.chef_step = Some(chef);
            }
        })
    }

    pub fn add_chef_action(&self, id: Uuid, step_id: Uuid, action: ChefAction) -> Result<Flow, NotFoundError> {
        self.mutate(id, |flow| {
            if let Some(chef) = find_chef_mut(flow, step_id) {
                chef.actions.push(action);
            }
        })
    }

    pub fn remove_chef_action(&self, id: Uuid, step_id: Uuid, action_id: Uuid) -> Result<Flow, NotFoundError> {
        self.mutate(id, |flow| {
            if let Some(chef) = find_chef_mut(flow, step_id) {
                chef.actions.retain(|a| a.id != action_id);
            }
        })
    }

    pub fn update_chef_action(&self, id: Uuid, step_id: Uuid, action: ChefAction) -> Result<Flow, NotFoundError> {
        self.mutate(id, |flow| {
            if let Some(chef) = find_chef_mut(flow, step_id) {
                if let Some(slot) = chef.actions.iter_mut().find(|a| a.id == action.id) {
                    *slot = action;
                }
            }
        })
    }

    /// Replace the flow's variable map wholesale. Re-execution of chef
    /// steps whose `inputVariable` changed is the flow engine's
    /// responsibility (spec §4.6, see `FlowEngine::update_variables`) —
    /// this just updates the stored map.
    pub fn update_variables(&self, id: Uuid, vars: VariableMap) -> Result<Flow, NotFoundError> {
        self.mutate(id, |flow| flow.variables = vars)
    }

    pub fn set_selected(&self, id: Uuid) -> Result<(), NotFoundError> {
        let inner = self.inner.read().unwrap();
        if !inner.flows.iter().any(|f| f.id == id) {
            return Err(NotFoundError::Flow(id.to_string()));
        }
        drop(inner);
        self.inner.write().unwrap().selected = Some(id);
        Ok(())
    }

    pub fn get_selected(&self) -> Option<Flow> {
        let inner = self.inner.read().unwrap();
        let id = inner.selected?;
        inner.flows.iter().find(|f| f.id == id).cloned()
    }

    fn mutate(&self, id: Uuid, f: impl FnOnce(&mut Flow)) -> Result<Flow, NotFoundError> {
        let mut inner = self.inner.write().unwrap();
        let flow = inner
            .flows
            .iter_mut()
            .find(|flow| flow.id == id)
            .ok_or_else(|| NotFoundError::Flow(id.to_string()))?;
        f(flow);
        Ok(flow.clone())
    }
}

fn find_chef_mut(flow: &mut Flow, step_id: Uuid) -> Option<&mut ChefStep> {
    flow.steps
        .iter_mut()
        .find(|s| s.id == step_id && s.kind == StepKind::Chef)
        .and_then(|s| s.chef_step.as_mut())
}

fn renumber(flows: &mut [Flow]) {
    let mut ordered: Vec<&mut Flow> = flows.iter_mut().collect();
    ordered.sort_by_key(|f| f.sorting_index);
    for (i, flow) in ordered.into_iter().enumerate() {
        flow.sorting_index = i as u32 + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RequestStep, ScriptStep};

    #[test]
    fn create_assigns_dense_sorting_index() {
        let store = FlowStore::new();
        let a = store.create(None);
        let b = store.create(None);
        assert_eq!(a.sorting_index, 1);
        assert_eq!(b.sorting_index, 2);
    }

    #[test]
    fn delete_renumbers_remaining_flows_densely() {
        let store = FlowStore::new();
        let a = store.create(None);
        let _b = store.create(None);
        let c = store.create(None);

        store.delete(a.id).unwrap();

        let indices: Vec<u32> = store.list().iter().map(|f| f.sorting_index).collect();
        assert_eq!(indices, vec![1, 2]);
        assert!(store.get(c.id).is_ok());
    }

    #[test]
    fn deleting_selected_flow_falls_back_to_lowest_index() {
        let store = FlowStore::new();
        let a = store.create(None);
        let b = store.create(None);
        store.set_selected(b.id).unwrap();

        store.delete(b.id).unwrap();

        assert_eq!(store.get_selected().unwrap().id, a.id);
    }

    #[test]
    fn add_and_delete_step() {
        let store = FlowStore::new();
        let flow = store.create(None);
        let step = FlowStep::script("script one", ScriptStep { content: "vars.set(\"x\", \"1\")".into() });
        let step_id = step.id;
        let flow = store.add_step(flow.id, step).unwrap();
        assert_eq!(flow.steps.len(), 1);
        assert_eq!(flow.steps[0].id, step_id);

        let flow = store.delete_step(flow.id, 0).unwrap();
        assert!(flow.steps.is_empty());
    }

    #[test]
    fn duplicate_creates_independent_step_ids() {
        let store = FlowStore::new();
        let flow = store.create(None);
        let step = FlowStep::request("req", RequestStep::new("example.test", true, b"GET / HTTP/1.1\r\n\r\n".to_vec()));
        let original_step_id = step.id;
        let flow = store.add_step(flow.id, step).unwrap();

        let duplicate = store.duplicate(flow.id).unwrap();
        assert_ne!(duplicate.id, flow.id);
        assert_ne!(duplicate.steps[0].id, original_step_id);
    }
}
