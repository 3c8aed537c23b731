// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bundle dependency resolution: depth-first search with three colors.

use crate::error::{PipelineError, Result};
use ahash::AHashMap;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    /// On the current recursion stack
    Grey,
    /// All dependencies resolved
    Black,
}

/// Topological load order for `root`: every bundle appears after all of its
/// dependencies, `root` last.
///
/// `dependencies_of` returns `None` for an unknown bundle. Fails on an unknown
/// dependency or a cycle; the cycle error names a bundle on the cycle.
pub fn resolve_load_order<'a, F>(root: &str, dependencies_of: F) -> Result<Vec<String>>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    if dependencies_of(root).is_none() {
        return Err(PipelineError::UnknownBundle(root.to_string()));
    }
    let mut colors: AHashMap<String, Color> = AHashMap::new();
    let mut order = Vec::new();
    visit(root, &dependencies_of, &mut colors, &mut order)?;
    Ok(order)
}

fn visit<'a, F>(
    bundle: &str,
    dependencies_of: &F,
    colors: &mut AHashMap<String, Color>,
    order: &mut Vec<String>,
) -> Result<()>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    match colors.get(bundle) {
        Some(Color::Black) => return Ok(()),
        Some(Color::Grey) => {
            return Err(PipelineError::DependencyCycle {
                bundle: bundle.to_string(),
            })
        }
        None => {}
    }
    colors.insert(bundle.to_string(), Color::Grey);

    let dependencies = dependencies_of(bundle).unwrap_or(&[]);
    for dependency in dependencies {
        if dependencies_of(dependency).is_none() {
            return Err(PipelineError::UnknownDependency {
                bundle: bundle.to_string(),
                dependency: dependency.clone(),
            });
        }
        visit(dependency, dependencies_of, colors, order)?;
    }

    colors.insert(bundle.to_string(), Color::Black);
    order.push(bundle.to_string());
    Ok(())
}

/// Whether `bundle` reaches `target` through its dependency edges
pub fn depends_on<'a, F>(bundle: &str, target: &str, dependencies_of: F) -> bool
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    let mut stack: Vec<&str> = vec![bundle];
    let mut seen: Vec<&str> = Vec::new();
    while let Some(current) = stack.pop() {
        if seen.contains(&current) {
            continue;
        }
        seen.push(current);
        for dependency in dependencies_of(current).unwrap_or(&[]) {
            if dependency == target {
                return true;
            }
            stack.push(dependency.as_str());
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> AHashMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    fn resolve(g: &AHashMap<String, Vec<String>>, root: &str) -> Result<Vec<String>> {
        resolve_load_order(root, |name| g.get(name).map(|deps| deps.as_slice()))
    }

    #[test]
    fn test_dependency_order() {
        let g = graph(&[("Core", &[]), ("UI", &["Core"]), ("HUD", &["UI", "Core"])]);
        assert_eq!(resolve(&g, "HUD").unwrap(), vec!["Core", "UI", "HUD"]);
    }

    #[test]
    fn test_diamond_visits_shared_dependency_once() {
        let g = graph(&[
            ("base", &[]),
            ("left", &["base"]),
            ("right", &["base"]),
            ("top", &["left", "right"]),
        ]);
        let order = resolve(&g, "top").unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order.first().map(String::as_str), Some("base"));
        assert_eq!(order.last().map(String::as_str), Some("top"));
    }

    #[test]
    fn test_cycle_names_member() {
        let g = graph(&[("A", &["B"]), ("B", &["C"]), ("C", &["A"])]);
        match resolve(&g, "A") {
            Err(PipelineError::DependencyCycle { bundle }) => {
                assert!(["A", "B", "C"].contains(&bundle.as_str()))
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let g = graph(&[("A", &["A"])]);
        assert!(matches!(
            resolve(&g, "A"),
            Err(PipelineError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_unknown_dependency() {
        let g = graph(&[("A", &["ghost"])]);
        match resolve(&g, "A") {
            Err(PipelineError::UnknownDependency { bundle, dependency }) => {
                assert_eq!(bundle, "A");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected unknown dependency, got {other:?}"),
        }
        assert!(matches!(
            resolve(&g, "nobody"),
            Err(PipelineError::UnknownBundle(_))
        ));
    }

    #[test]
    fn test_depends_on_transitively() {
        let g = graph(&[("Core", &[]), ("UI", &["Core"]), ("HUD", &["UI"])]);
        let deps = |name: &str| g.get(name).map(|d| d.as_slice());
        assert!(depends_on("HUD", "Core", deps));
        assert!(!depends_on("Core", "HUD", deps));
    }
}
