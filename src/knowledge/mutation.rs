//! Local effects of each mutation on the cached active/archived sets.

use crate::api::types::BatchAction;

use super::events::MutationKind;
use super::ident::KnowledgePointRef;
use super::types::KnowledgePoint;

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
  Archive(KnowledgePointRef),
  Unarchive(KnowledgePointRef),
  Delete(KnowledgePointRef),
  SetMastery(KnowledgePointRef, f64),
  Batch(BatchAction, Vec<KnowledgePointRef>),
  /// Server-side only; nothing to apply locally.
  FinalizeSession,
}

impl Mutation {
  pub fn kind(&self) -> MutationKind {
    match self {
      Mutation::Archive(_) => MutationKind::Archive,
      Mutation::Unarchive(_) => MutationKind::Unarchive,
      Mutation::Delete(_) => MutationKind::Delete,
      Mutation::SetMastery(..) => MutationKind::UpdateMastery,
      Mutation::Batch(..) => MutationKind::Batch,
      Mutation::FinalizeSession => MutationKind::FinalizeSession,
    }
  }

  /// Apply to the cached sets. Returns whether anything changed.
  ///
  /// A matching record always ends up in exactly one set (or none, for
  /// deletes).
  pub fn apply(&self, active: &mut Vec<KnowledgePoint>, archived: &mut Vec<KnowledgePoint>) -> bool {
    match self {
      Mutation::Archive(target) => relocate(target, active, archived, true),
      Mutation::Unarchive(target) => relocate(target, archived, active, false),
      Mutation::Delete(target) => remove(target, active) | remove(target, archived),
      Mutation::SetMastery(target, level) => {
        set_mastery(target, *level, active) | set_mastery(target, *level, archived)
      }
      Mutation::Batch(action, targets) => {
        let mut changed = false;
        for target in targets {
          changed |= match action {
            BatchAction::Archive => relocate(target, active, archived, true),
            BatchAction::Unarchive => relocate(target, archived, active, false),
            BatchAction::Delete => remove(target, active) | remove(target, archived),
          };
        }
        changed
      }
      Mutation::FinalizeSession => false,
    }
  }
}

fn relocate(
  target: &KnowledgePointRef,
  from: &mut Vec<KnowledgePoint>,
  to: &mut Vec<KnowledgePoint>,
  archived: bool,
) -> bool {
  let mut moved = Vec::new();
  from.retain(|p| {
    if target.matches(p) {
      moved.push(p.clone());
      false
    } else {
      true
    }
  });

  if moved.is_empty() {
    return false;
  }

  to.retain(|p| !target.matches(p));
  to.extend(moved.into_iter().map(|mut p| {
    p.is_archived = archived;
    p
  }));
  true
}

fn remove(target: &KnowledgePointRef, points: &mut Vec<KnowledgePoint>) -> bool {
  let before = points.len();
  points.retain(|p| !target.matches(p));
  points.len() != before
}

fn set_mastery(target: &KnowledgePointRef, level: f64, points: &mut [KnowledgePoint]) -> bool {
  let mut changed = false;
  for p in points.iter_mut().filter(|p| target.matches(p)) {
    if p.mastery_level != level {
      p.mastery_level = level;
      changed = true;
    }
  }
  changed
}
