//! 提供者生命周期编排
//!
//! 每次迁移都在提供者的迁移锁内完成：并发调用 `start` 时只有一个线程执行钩子，
//! 其余线程等待后观察到 `Started` 直接返回。失败的迁移不改变状态，可以重试。

use super::{Provider, ProviderContext, ProviderState, Timing};
use crate::config::merge_layer;
use crate::container::{ActiveGuard, Resolution};
use crate::errors::{BoxError, ContainerError, Phase, Result};
use crate::logging::OperationTimer;
use crate::slice::Slice;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 同一提供者的不同阶段使用不同的节点标识，提供者地址按 8 字节对齐
fn node_id(provider: &Provider, phase: Phase) -> usize {
    provider as *const Provider as usize + phase as usize
}

pub fn prepare(provider: &Arc<Provider>) -> Result<()> {
    if provider.state() >= ProviderState::Prepared {
        return Ok(());
    }

    let _active = ActiveGuard::enter(
        node_id(provider, Phase::Prepare),
        format!("{} (prepare)", provider.qualified_name()),
    )?;
    let slice = provider.slice()?;

    // 继承配置时，祖先提供者需要先得到最终配置
    let inherited = if slice.inherits_config(provider.family()) {
        match slice.ancestor_provider(provider.family()) {
            Some(ancestor) => {
                prepare(&ancestor)?;
                ancestor.finalized_config()
            }
            None => None,
        }
    } else {
        None
    };

    let _transition = provider.transition.lock();
    if provider.state() >= ProviderState::Prepared {
        return Ok(());
    }

    let config = layered_config(provider, &slice, inherited.as_ref());
    let mut ctx = ProviderContext::new(provider, &slice, Phase::Prepare, config);
    run_hooks(provider, Phase::Prepare, &mut ctx, &mut false)?;
    let (config, pending) = ctx.into_parts();

    validate_required(provider, &slice, &config)?;
    commit(provider, &slice, pending)?;

    provider.set_finalized(config);
    provider.set_state(ProviderState::Prepared);
    info!(provider = %provider.qualified_name(), "provider prepared");
    Ok(())
}

pub fn start(provider: &Arc<Provider>) -> Result<()> {
    let state = provider.state();
    if state >= ProviderState::Started {
        if state == ProviderState::Stopped {
            debug!(provider = %provider.qualified_name(), "start ignored, provider already stopped");
        }
        return Ok(());
    }

    let _active = ActiveGuard::enter(node_id(provider, Phase::Start), provider.qualified_name())?;
    check_dependencies(provider)?;
    prepare(provider)?;

    for dependency in dependency_providers(provider)? {
        start(&dependency)?;
    }

    let slice = provider.slice()?;
    let _transition = provider.transition.lock();
    if provider.state() >= ProviderState::Started {
        return Ok(());
    }

    let timer = OperationTimer::new("provider.start")
        .with_metadata("provider", provider.qualified_name());

    let config = provider.finalized_config().unwrap_or(Value::Null);
    let mut ctx = ProviderContext::new(provider, &slice, Phase::Start, config);
    let mut source_started = false;
    let outcome = run_hooks(provider, Phase::Start, &mut ctx, &mut source_started).and_then(|()| {
        let (_, pending) = ctx.into_parts();
        commit(provider, &slice, pending)
    });
    if let Err(err) = outcome {
        if source_started {
            roll_back_source(provider, &slice);
        }
        return Err(err);
    }

    provider.set_state(ProviderState::Started);
    timer.finish();
    info!(provider = %provider.qualified_name(), "provider started");
    Ok(())
}

pub fn stop(provider: &Arc<Provider>) -> Result<()> {
    if provider.state() != ProviderState::Started {
        debug!(
            provider = %provider.qualified_name(),
            state = %provider.state(),
            "stop ignored, provider not started"
        );
        return Ok(());
    }

    let slice = provider.slice()?;
    let _transition = provider.transition.lock();
    if provider.state() != ProviderState::Started {
        return Ok(());
    }

    let config = provider.finalized_config().unwrap_or(Value::Null);
    let mut ctx = ProviderContext::new(provider, &slice, Phase::Stop, config);
    run_hooks(provider, Phase::Stop, &mut ctx, &mut false)?;

    provider.set_state(ProviderState::Stopped);
    info!(provider = %provider.qualified_name(), "provider stopped");
    Ok(())
}

/// 在执行任何钩子之前检查依赖图中的环
pub fn check_dependencies(provider: &Arc<Provider>) -> Result<()> {
    let mut path = Vec::new();
    let mut visited = HashSet::new();
    visit(provider, &mut path, &mut visited)
}

fn visit(provider: &Arc<Provider>, path: &mut Vec<Arc<Provider>>, visited: &mut HashSet<usize>) -> Result<()> {
    let id = Arc::as_ptr(provider) as usize;
    if visited.contains(&id) {
        return Ok(());
    }

    if let Some(position) = path.iter().position(|p| Arc::ptr_eq(p, provider)) {
        let mut chain: Vec<String> = path[position..]
            .iter()
            .map(|p| p.qualified_name().to_string())
            .collect();
        chain.push(provider.qualified_name().to_string());
        return Err(ContainerError::CircularDependency { chain });
    }

    path.push(provider.clone());
    for dependency in dependency_providers(provider)? {
        visit(&dependency, path, visited)?;
    }
    path.pop();
    visited.insert(id);
    Ok(())
}

/// 按名称在所属切片及其祖先中查找依赖的提供者
fn dependency_providers(provider: &Provider) -> Result<Vec<Arc<Provider>>> {
    if provider.dependencies().is_empty() {
        return Ok(Vec::new());
    }
    let slice = provider.slice()?;
    provider
        .dependencies()
        .iter()
        .map(|name| {
            slice
                .find_provider(name)
                .ok_or_else(|| ContainerError::ProviderNotFound {
                    name: name.clone(),
                    slice: slice.qualified_name().to_string(),
                })
        })
        .collect()
}

fn layered_config(provider: &Provider, slice: &Slice, inherited: Option<&Value>) -> Value {
    let settings = slice.context().settings();
    let mut config = Value::Object(Map::new());

    merge_layer(&mut config, provider.defaults());
    for binding in &provider.bindings {
        if let Some(raw) = settings.get(&binding.settings_key) {
            merge_layer(&mut config, &binding.layer(raw));
        }
    }
    if let Some(inherited) = inherited {
        merge_layer(&mut config, inherited);
    }
    for binding in &provider.bindings {
        if let Some(raw) = settings.get_scoped(slice.name(), &binding.settings_key) {
            merge_layer(&mut config, &binding.layer(raw));
        }
    }
    merge_layer(&mut config, &provider.overrides());
    config
}

fn validate_required(provider: &Provider, slice: &Slice, config: &Value) -> Result<()> {
    for setting in &provider.required {
        let missing = match config.get(setting) {
            None | Some(Value::Null) => true,
            Some(Value::String(value)) => value.trim().is_empty(),
            Some(_) => false,
        };
        if !missing {
            continue;
        }

        let reason = match provider.bindings.iter().find(|b| &b.setting == setting) {
            Some(binding) => format!(
                "required setting is missing; configure it or set '{}' (or '{}.{}')",
                binding.settings_key,
                slice.name(),
                binding.settings_key
            ),
            None => "required setting is missing".to_string(),
        };
        return Err(ContainerError::Configuration {
            provider: provider.qualified_name().to_string(),
            setting: setting.clone(),
            reason,
        });
    }
    Ok(())
}

/// `source_ran` 在提供者实现的阶段主体成功后置位
fn run_hooks(provider: &Provider, phase: Phase, ctx: &mut ProviderContext<'_>, source_ran: &mut bool) -> Result<()> {
    let fail = |err: BoxError| ContainerError::from_hook(provider.qualified_name(), phase, err);

    for hook in provider.hooks.get(phase, Timing::Before) {
        hook(ctx).map_err(fail)?;
    }
    if let Some(source) = &provider.source {
        match phase {
            Phase::Prepare => source.prepare(ctx),
            Phase::Start => source.start(ctx),
            Phase::Stop => source.stop(ctx),
        }
        .map_err(fail)?;
        *source_ran = true;
    }
    for hook in provider.hooks.get(phase, Timing::On) {
        hook(ctx).map_err(fail)?;
    }
    for hook in provider.hooks.get(phase, Timing::After) {
        hook(ctx).map_err(fail)?;
    }
    Ok(())
}

/// 启动失败时撤销提供者实现已经获取的资源，状态仍停在 `Prepared`
fn roll_back_source(provider: &Provider, slice: &Slice) {
    let Some(source) = &provider.source else {
        return;
    };
    let config = provider.finalized_config().unwrap_or(Value::Null);
    let mut ctx = ProviderContext::new(provider, slice, Phase::Stop, config);
    match source.stop(&mut ctx) {
        Ok(()) => debug!(provider = %provider.qualified_name(), "rolled back failed start"),
        Err(err) => warn!(provider = %provider.qualified_name(), error = %err, "rollback after failed start failed"),
    }
}

/// 提交钩子缓存的注册；任何一个键冲突都不会写入
fn commit(provider: &Provider, slice: &Slice, pending: Vec<(String, Resolution)>) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }

    let registry = slice.registry();
    for (index, (key, _)) in pending.iter().enumerate() {
        if registry.is_frozen() {
            return Err(ContainerError::FrozenRegistry {
                key: key.clone(),
                slice: slice.qualified_name().to_string(),
            });
        }
        if registry.contains_key(key) || pending[..index].iter().any(|(k, _)| k == key) {
            return Err(ContainerError::DuplicateKey {
                key: key.clone(),
                slice: slice.qualified_name().to_string(),
            });
        }
    }

    let keys: Vec<String> = pending.iter().map(|(key, _)| key.clone()).collect();
    for (key, resolution) in pending {
        registry.register(key, resolution)?;
    }
    debug!(provider = %provider.qualified_name(), keys = ?keys, "registered provider components");
    provider.record_keys(keys);
    Ok(())
}
