// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Function registry with decorator resolution.
//!
//! Registering a function under a name that is already taken deactivates the new function;
//! overriding requires an explicit decoration. Decorating a function owned by another
//! plugin records a dependency edge, and plugin listings are topologically ordered along
//! those edges. Plugins caught in a dependency cycle are logged and left out of listings.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;

use super::{
    CallContext, Func, FuncShape, FuncSpec, FunctionError, FunctionInfo, Plugin, PluginInfo,
    PluginWithFuncs, TEMPLATE_FUNCS_CAPABILITY,
};

#[derive(Default)]
struct Inner {
    funcs: HashMap<String, Func>,
    func_owner: HashMap<String, String>,
    plugins: HashMap<String, PluginInfo>,
    plugin_order: Vec<String>,
    plugin_funcs: HashMap<String, Vec<FunctionInfo>>,
    plugin_deps: HashMap<String, Vec<String>>,
}

#[derive(Default)]
pub struct FunctionRegistry {
    inner: RwLock<Inner>,
    generation: AtomicU64,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("FunctionRegistry")
            .field("plugins", &inner.plugin_order)
            .field("functions", &inner.funcs.len())
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in `gripmock` plugin.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(&super::builtins::Builtins);
        registry
    }

    pub fn register(&self, plugin: &dyn Plugin) {
        self.add_plugin(plugin.info(), plugin.specs());
    }

    pub fn add_plugin(&self, info: PluginInfo, specs: Vec<FuncSpec>) {
        let info = normalize_info(info);
        let mut inner = self.inner.write();
        if !inner.plugins.contains_key(&info.name) {
            inner.plugins.insert(info.name.clone(), info.clone());
            inner.plugin_order.push(info.name.clone());
        }
        for spec in specs {
            inner.add_spec(&info.name, spec);
        }
        drop(inner);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Bumped on every registration, so consumers can rebuild derived tables.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Active functions by name.
    pub fn funcs(&self) -> BTreeMap<String, Func> {
        self.inner
            .read()
            .funcs
            .iter()
            .map(|(name, f)| (name.clone(), f.clone()))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Func> {
        self.inner.read().funcs.get(name).cloned()
    }

    pub fn call(&self, name: &str, ctx: &CallContext, args: &[Value]) -> Result<Value, FunctionError> {
        let f = self
            .get(name)
            .ok_or_else(|| FunctionError::Failed(format!("function \"{name}\" is not registered")))?;
        f(ctx, args)
    }

    /// Plugins, producers before the plugins decorating them.
    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.groups().into_iter().map(|group| group.plugin).collect()
    }

    /// Plugins with their function metadata, in dependency order.
    pub fn groups(&self) -> Vec<PluginWithFuncs> {
        let inner = self.inner.read();
        let (order, skipped) = inner.sorted_plugin_order();
        if !skipped.is_empty() {
            tracing::warn!(plugins = ?skipped, "plugin dependency cycle detected; skipping");
        }
        order
            .into_iter()
            .filter_map(|name| {
                let mut plugin = inner.plugins.get(&name)?.clone();
                if let Some(deps) = inner.plugin_deps.get(&name) {
                    plugin.depends = deps.clone();
                }
                let funcs = inner.plugin_funcs.get(&name).cloned().unwrap_or_default();
                Some(PluginWithFuncs { plugin, funcs })
            })
            .collect()
    }

    /// Active functions tagged with `group`, in registration order.
    pub fn hooks(&self, group: &str) -> Vec<Func> {
        if group.is_empty() {
            return Vec::new();
        }
        let inner = self.inner.read();
        let mut seen = HashSet::new();
        inner
            .plugin_order
            .iter()
            .filter_map(|plugin| inner.plugin_funcs.get(plugin))
            .flatten()
            .filter(|info| info.group == group && !info.deactivated)
            .filter(|info| seen.insert(info.name.clone()))
            .filter_map(|info| inner.funcs.get(&info.name).cloned())
            .collect()
    }
}

fn normalize_info(mut info: PluginInfo) -> PluginInfo {
    if info.capabilities.is_empty() {
        info.capabilities = vec![TEMPLATE_FUNCS_CAPABILITY.to_string()];
    }
    info
}

/// `"@owner/target"` -> `("target", Some("owner"))`, `"target"` -> `("target", None)`
fn parse_decorates(raw: &str) -> (String, Option<String>) {
    let raw = raw.trim();
    let raw = raw.strip_prefix('@').unwrap_or(raw);
    match raw.split_once('/') {
        Some((owner, target)) if !owner.is_empty() && !target.is_empty() => {
            (target.to_string(), Some(owner.to_string()))
        }
        _ => (raw.to_string(), None),
    }
}

impl Inner {
    fn add_spec(&mut self, plugin: &str, spec: FuncSpec) {
        if spec.name.is_empty() {
            return;
        }

        let mut entry = FunctionInfo {
            name: spec.name.clone(),
            description: spec.description.clone(),
            group: spec.group.clone(),
            replacement: spec.replacement.clone(),
            ..Default::default()
        };

        if spec.decorates.trim().is_empty() {
            if let Some(owner) = self.func_owner.get(&spec.name) {
                tracing::warn!(
                    plugin,
                    function = %spec.name,
                    owner = %owner,
                    "function ignored (implicit override); use decorates=@owner/function to decorate explicitly"
                );
                entry.deactivated = true;
                self.push_info(plugin, entry);
                return;
            }
            let Some(f) = spec.shape.normalize() else {
                tracing::warn!(plugin, function = %spec.name, "decorator declares no target; skipping");
                return;
            };
            self.funcs.insert(spec.name.clone(), f);
            self.func_owner.insert(spec.name, plugin.to_string());
            self.push_info(plugin, entry);
            return;
        }

        let (target, declared_owner) = parse_decorates(&spec.decorates);
        let FuncShape::Decorator(decorate) = spec.shape else {
            tracing::warn!(
                plugin,
                function = %spec.name,
                "decorates is set but the function is not a decorator; skipping"
            );
            return;
        };
        let Some(base) = self.funcs.get(&target).cloned() else {
            tracing::warn!(
                plugin,
                function = %spec.name,
                target = %target,
                "decorator target not found; skipping"
            );
            return;
        };

        let owner = declared_owner.or_else(|| self.func_owner.get(&target).cloned());
        if let Some(owner) = owner.as_deref() {
            if owner != plugin {
                self.add_depend(plugin, owner);
            }
        }

        entry.decorates = target;
        entry.decorates_plugin = owner.unwrap_or_default();
        self.funcs.insert(spec.name.clone(), decorate(base));
        self.func_owner.insert(spec.name, plugin.to_string());
        self.push_info(plugin, entry);
    }

    fn push_info(&mut self, plugin: &str, entry: FunctionInfo) {
        self.plugin_funcs
            .entry(plugin.to_string())
            .or_default()
            .push(entry);
    }

    fn add_depend(&mut self, plugin: &str, depend: &str) {
        let deps = self.plugin_deps.entry(plugin.to_string()).or_default();
        if !deps.iter().any(|d| d == depend) {
            deps.push(depend.to_string());
        }
    }

    /// Kahn's algorithm over registration order. Returns the ordered plugins and the
    /// (sorted) plugins left with unresolved dependencies, i.e. cycle members.
    fn sorted_plugin_order(&self) -> (Vec<String>, Vec<String>) {
        let registered: HashSet<&str> = self.plugin_order.iter().map(String::as_str).collect();
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for name in &self.plugin_order {
            for dep in self.plugin_deps.get(name).into_iter().flatten() {
                if !registered.contains(dep.as_str()) {
                    continue;
                }
                dependents.entry(dep.as_str()).or_default().push(name.as_str());
                *indegree.entry(name.as_str()).or_default() += 1;
            }
        }

        let mut queue: VecDeque<&str> = self
            .plugin_order
            .iter()
            .map(String::as_str)
            .filter(|name| indegree.get(name).copied().unwrap_or(0) == 0)
            .collect();

        let mut ordered = Vec::with_capacity(self.plugin_order.len());
        while let Some(name) = queue.pop_front() {
            ordered.push(name.to_string());
            for next in dependents.get(name).into_iter().flatten() {
                if let Some(degree) = indegree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*next);
                    }
                }
            }
        }

        let mut skipped: Vec<String> = indegree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        skipped.sort();
        (ordered, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::func;
    use serde_json::json;

    fn upper_plugin() -> (PluginInfo, Vec<FuncSpec>) {
        (
            PluginInfo::new("strings"),
            vec![FuncSpec::fallible("shout", |args: &[Value]| {
                Ok(json!(args[0].as_str().unwrap_or_default().to_uppercase()))
            })
            .in_group("string")],
        )
    }

    fn suffix_decorator(name: &str, target: &str, suffix: &'static str) -> FuncSpec {
        FuncSpec::decorator(name, target, move |base: Func| {
            func(move |ctx, args| {
                let value = base(ctx, args)?;
                Ok(json!(format!("{}{suffix}", value.as_str().unwrap_or_default())))
            })
        })
    }

    #[test]
    fn test_register_and_call() {
        let registry = FunctionRegistry::new();
        let (info, specs) = upper_plugin();
        registry.add_plugin(info, specs);

        let ctx = CallContext::default();
        assert_eq!(registry.call("shout", &ctx, &[json!("hi")]).unwrap(), json!("HI"));
        assert!(registry.call("missing", &ctx, &[]).is_err());

        let plugins = registry.plugins();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].capabilities, vec!["template-funcs".to_string()]);
        assert!(registry.generation() > 0);
    }

    #[test]
    fn test_duplicate_without_decoration_is_deactivated() {
        let registry = FunctionRegistry::new();
        let (info, specs) = upper_plugin();
        registry.add_plugin(info, specs);
        registry.add_plugin(
            PluginInfo::new("impostor"),
            vec![FuncSpec::nullary("shout", || json!("nope"))],
        );

        let ctx = CallContext::default();
        assert_eq!(registry.call("shout", &ctx, &[json!("hi")]).unwrap(), json!("HI"));

        let groups = registry.groups();
        let impostor = groups.iter().find(|g| g.plugin.name == "impostor").unwrap();
        assert!(impostor.funcs[0].deactivated);
    }

    #[test]
    fn test_decorator_wraps_and_orders_plugins() {
        let registry = FunctionRegistry::new();
        registry.add_plugin(
            PluginInfo::new("decorating"),
            vec![FuncSpec::nullary("noop", || Value::Null)],
        );
        let (info, specs) = upper_plugin();
        registry.add_plugin(info, specs);
        registry.add_plugin(
            PluginInfo::new("decorating"),
            vec![suffix_decorator("shout", "@strings/shout", "!")],
        );

        let ctx = CallContext::default();
        assert_eq!(registry.call("shout", &ctx, &[json!("hi")]).unwrap(), json!("HI!"));

        let names: Vec<String> = registry.plugins().into_iter().map(|p| p.name).collect();
        // "decorating" registered first but depends on "strings"
        assert_eq!(names, vec!["strings".to_string(), "decorating".to_string()]);

        let groups = registry.groups();
        let decorating = &groups[1];
        assert_eq!(decorating.plugin.depends, vec!["strings".to_string()]);
        let info = decorating.funcs.iter().find(|f| f.name == "shout").unwrap();
        assert_eq!(info.decorates, "shout");
        assert_eq!(info.decorates_plugin, "strings");
    }

    #[test]
    fn test_bare_decorates_resolves_owner() {
        let registry = FunctionRegistry::new();
        let (info, specs) = upper_plugin();
        registry.add_plugin(info, specs);
        registry.add_plugin(
            PluginInfo::new("polite"),
            vec![suffix_decorator("shout_politely", "shout", " please")],
        );

        let ctx = CallContext::default();
        assert_eq!(
            registry.call("shout_politely", &ctx, &[json!("hi")]).unwrap(),
            json!("HI please")
        );
        assert_eq!(registry.call("shout", &ctx, &[json!("hi")]).unwrap(), json!("HI"));
        assert_eq!(registry.plugins()[1].depends, vec!["strings".to_string()]);
    }

    #[test]
    fn test_missing_target_is_skipped() {
        let registry = FunctionRegistry::new();
        registry.add_plugin(
            PluginInfo::new("lonely"),
            vec![suffix_decorator("ghost", "@nobody/ghost", "?")],
        );
        assert!(registry.get("ghost").is_none());
        assert_eq!(registry.plugins().len(), 1);
    }

    #[test]
    fn test_cycle_is_excluded_without_panicking() {
        let registry = FunctionRegistry::new();
        registry.add_plugin(
            PluginInfo::new("x"),
            vec![FuncSpec::nullary("fx", || json!("x"))],
        );
        registry.add_plugin(
            PluginInfo::new("y"),
            vec![
                FuncSpec::nullary("fy", || json!("y")),
                suffix_decorator("fx", "@x/fx", "+y"),
            ],
        );
        registry.add_plugin(
            PluginInfo::new("x"),
            vec![suffix_decorator("fy", "@y/fy", "+x")],
        );
        registry.add_plugin(
            PluginInfo::new("z"),
            vec![FuncSpec::nullary("fz", || json!("z"))],
        );

        let names: Vec<String> = registry.plugins().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["z".to_string()]);

        // functions keep working
        let ctx = CallContext::default();
        assert_eq!(registry.call("fx", &ctx, &[]).unwrap(), json!("x+y"));
        assert_eq!(registry.call("fy", &ctx, &[]).unwrap(), json!("y+x"));
    }

    #[test]
    fn test_hooks_by_group() {
        let registry = FunctionRegistry::new();
        registry.add_plugin(
            PluginInfo::new("audit"),
            vec![
                FuncSpec::nullary("first", || json!(1)).in_group("matcher-hook"),
                FuncSpec::nullary("second", || json!(2)).in_group("matcher-hook"),
                FuncSpec::nullary("other", || json!(3)).in_group("math"),
            ],
        );
        registry.add_plugin(
            PluginInfo::new("dupe"),
            vec![FuncSpec::nullary("first", || json!(9)).in_group("matcher-hook")],
        );

        let ctx = CallContext::default();
        let results: Vec<Value> = registry
            .hooks("matcher-hook")
            .iter()
            .map(|hook| hook(&ctx, &[]).unwrap())
            .collect();
        assert_eq!(results, vec![json!(1), json!(2)]);
        assert!(registry.hooks("").is_empty());
    }

    #[test]
    fn test_parse_decorates() {
        assert_eq!(parse_decorates("@a/b"), ("b".to_string(), Some("a".to_string())));
        assert_eq!(parse_decorates("a/b"), ("b".to_string(), Some("a".to_string())));
        assert_eq!(parse_decorates(" b "), ("b".to_string(), None));
    }
}
