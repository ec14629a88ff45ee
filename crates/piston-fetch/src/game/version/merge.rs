use crate::game::version::descriptor::{LaunchArguments, Library, VersionDescriptor};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("version descriptor not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("version '{child}' inherits from '{parent}', which is not installed")]
    MissingParent { child: String, parent: String },

    #[error("inheritance cycle through {0:?}")]
    Cycle(Vec<String>),
}

/// A complete descriptor plus the ids it was merged from (child first).
#[derive(Debug, Clone)]
pub struct ResolvedVersion {
    pub descriptor: VersionDescriptor,
    pub chain: Vec<String>,
}

impl ResolvedVersion {
    /// The root of the chain: the version that owns the client jar.
    pub fn jar_version(&self) -> &str {
        self.chain
            .last()
            .map(String::as_str)
            .unwrap_or(self.descriptor.id.as_str())
    }
}

/// Merge a child descriptor over its parent.
///
/// Scalars are child-first. Libraries are the parent's followed by the
/// child's with repeated coordinate names dropped. An argument list is taken
/// from the child only when it is non-empty. Merging a complete descriptor
/// with itself returns it unchanged.
pub fn merge(child: &VersionDescriptor, parent: &VersionDescriptor) -> VersionDescriptor {
    VersionDescriptor {
        id: child.id.clone(),
        version_type: child.version_type.clone().or_else(|| parent.version_type.clone()),
        main_class: child.main_class.clone().or_else(|| parent.main_class.clone()),
        inherits_from: None,
        asset_index: child.asset_index.clone().or_else(|| parent.asset_index.clone()),
        assets: child.assets.clone().or_else(|| parent.assets.clone()),
        java_version: child.java_version.clone().or_else(|| parent.java_version.clone()),
        downloads: child.downloads.clone().or_else(|| parent.downloads.clone()),
        libraries: dedup_libraries(parent.libraries.iter().chain(child.libraries.iter())),
        arguments: merge_arguments(&child.arguments, &parent.arguments),
        release_time: child.release_time.clone().or_else(|| parent.release_time.clone()),
        time: child.time.clone().or_else(|| parent.time.clone()),
    }
}

fn dedup_libraries<'a>(libs: impl Iterator<Item = &'a Library>) -> Vec<Library> {
    let mut seen: HashSet<&str> = HashSet::new();
    libs.filter(|l| seen.insert(l.name.as_str()))
        .cloned()
        .collect()
}

fn merge_arguments(child: &LaunchArguments, parent: &LaunchArguments) -> LaunchArguments {
    match (child, parent) {
        (
            LaunchArguments::Modern { game: cg, jvm: cj },
            LaunchArguments::Modern { game: pg, jvm: pj },
        ) => LaunchArguments::Modern {
            game: if cg.is_empty() { pg.clone() } else { cg.clone() },
            jvm: if cj.is_empty() { pj.clone() } else { cj.clone() },
        },
        (c, p) if c.is_empty() => p.clone(),
        // Legacy strings are complete on their own and replace the parent's.
        (c, _) => c.clone(),
    }
}

pub fn descriptor_path(versions_dir: &Path, id: &str) -> PathBuf {
    versions_dir.join(id).join(format!("{}.json", id))
}

pub async fn read_descriptor(versions_dir: &Path, id: &str) -> Result<VersionDescriptor> {
    let path = descriptor_path(versions_dir, id);
    if !path.exists() {
        return Err(DescriptorError::NotFound { path }.into());
    }
    let text = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    VersionDescriptor::from_json(&text)
        .with_context(|| format!("Failed to parse version.json at {:?}", path))
}

/// Follow `inheritsFrom` through installed descriptors and merge the chain.
pub async fn resolve_version_chain(versions_dir: &Path, id: &str) -> Result<ResolvedVersion> {
    let mut descriptors: Vec<VersionDescriptor> = Vec::new();
    let mut chain: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut next = Some(id.to_string());

    while let Some(current) = next.take() {
        if !seen.insert(current.clone()) {
            chain.push(current);
            return Err(DescriptorError::Cycle(chain).into());
        }

        let descriptor = match read_descriptor(versions_dir, &current).await {
            Ok(d) => d,
            Err(e) => {
                return match (e.downcast_ref::<DescriptorError>(), chain.last()) {
                    (Some(DescriptorError::NotFound { .. }), Some(child)) => {
                        Err(DescriptorError::MissingParent {
                            child: child.clone(),
                            parent: current,
                        }
                        .into())
                    }
                    _ => Err(e),
                };
            }
        };

        next = descriptor.inherits_from.clone();
        chain.push(current);
        descriptors.push(descriptor);
    }

    let mut iter = descriptors.into_iter().rev();
    let mut merged = match iter.next() {
        Some(root) => root,
        None => return Err(DescriptorError::Cycle(chain).into()),
    };
    for child in iter {
        merged = merge(&child, &merged);
    }

    log::debug!("Resolved version chain {:?}", chain);
    Ok(ResolvedVersion {
        descriptor: merged,
        chain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::version::descriptor::Argument;
    use tempfile::tempdir;

    fn parse(json: &str) -> VersionDescriptor {
        VersionDescriptor::from_json(json).unwrap()
    }

    fn vanilla() -> VersionDescriptor {
        parse(
            r#"{
                "id": "1.20.1",
                "type": "release",
                "mainClass": "net.minecraft.client.main.Main",
                "assetIndex": {"id": "5", "sha1": "aa", "size": 1, "url": "https://piston-meta.mojang.com/5.json"},
                "javaVersion": {"component": "java-runtime-gamma", "majorVersion": 17},
                "downloads": {"client": {"url": "https://piston-data.mojang.com/client.jar", "sha1": "bb", "size": 2}},
                "arguments": {"game": ["--username", "${auth_player_name}"], "jvm": ["-cp", "${classpath}"]},
                "libraries": [
                    {"name": "com.mojang:brigadier:1.1.8"},
                    {"name": "org.ow2.asm:asm:9.6"}
                ]
            }"#,
        )
    }

    fn fabric() -> VersionDescriptor {
        parse(
            r#"{
                "id": "fabric-loader-0.15.0-1.20.1",
                "inheritsFrom": "1.20.1",
                "mainClass": "net.fabricmc.loader.impl.launch.knot.KnotClient",
                "arguments": {"game": [], "jvm": ["-DFabricMcEmu= net.minecraft.client.main.Main "]},
                "libraries": [
                    {"name": "org.ow2.asm:asm:9.6", "url": "https://maven.fabricmc.net/"},
                    {"name": "net.fabricmc:fabric-loader:0.15.0", "url": "https://maven.fabricmc.net/"}
                ]
            }"#,
        )
    }

    #[test]
    fn test_merge_child_over_parent() {
        let merged = merge(&fabric(), &vanilla());

        assert_eq!(merged.id, "fabric-loader-0.15.0-1.20.1");
        assert!(merged.is_complete());
        assert_eq!(
            merged.main_class.as_deref(),
            Some("net.fabricmc.loader.impl.launch.knot.KnotClient")
        );
        assert_eq!(merged.version_type.as_deref(), Some("release"));
        assert_eq!(merged.assets_id(), Some("5"));
        assert_eq!(merged.java_version.as_ref().unwrap().major_version, 17);
        assert!(merged.client_download().is_some());

        let names: Vec<&str> = merged.libraries.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "com.mojang:brigadier:1.1.8",
                "org.ow2.asm:asm:9.6",
                "net.fabricmc:fabric-loader:0.15.0"
            ]
        );
    }

    #[test]
    fn test_merge_argument_lists() {
        let merged = merge(&fabric(), &vanilla());
        match merged.arguments {
            LaunchArguments::Modern { game, jvm } => {
                // empty child game list keeps the parent's
                assert_eq!(game.len(), 2);
                assert_eq!(
                    jvm,
                    vec![Argument::Simple(
                        "-DFabricMcEmu= net.minecraft.client.main.Main ".into()
                    )]
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_merge_forge_legacy_replaces_vanilla_string() {
        let parent = parse(r#"{"id":"1.12.2","minecraftArguments":"--username ${auth_player_name}"}"#);
        let child = parse(
            r#"{"id":"1.12.2-forge","inheritsFrom":"1.12.2","minecraftArguments":"--username ${auth_player_name} --tweakClass net.minecraftforge.fml.common.launcher.FMLTweaker"}"#,
        );
        let merged = merge(&child, &parent);
        assert!(matches!(merged.arguments, LaunchArguments::ForgeLegacy(ref s) if s.contains("FMLTweaker")));
    }

    #[test]
    fn test_merge_child_without_arguments_keeps_parent() {
        let parent = parse(r#"{"id":"1.8.9","minecraftArguments":"--username x"}"#);
        let child = parse(r#"{"id":"optifine","inheritsFrom":"1.8.9"}"#);
        assert_eq!(merge(&child, &parent).arguments, parent.arguments);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let complete = merge(&fabric(), &vanilla());
        assert_eq!(merge(&complete, &complete), complete);
        let v = vanilla();
        assert_eq!(merge(&v, &v), v);
    }

    fn write(dir: &Path, d: &VersionDescriptor) {
        let path = descriptor_path(dir, &d.id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_string(d).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn resolves_chain_from_disk() {
        let dir = tempdir().unwrap();
        write(dir.path(), &vanilla());
        write(dir.path(), &fabric());

        let resolved = resolve_version_chain(dir.path(), "fabric-loader-0.15.0-1.20.1")
            .await
            .unwrap();
        assert_eq!(resolved.chain, vec!["fabric-loader-0.15.0-1.20.1", "1.20.1"]);
        assert_eq!(resolved.jar_version(), "1.20.1");
        assert!(resolved.descriptor.is_complete());
        assert_eq!(resolved.descriptor.libraries.len(), 3);
    }

    #[tokio::test]
    async fn missing_parent_is_reported() {
        let dir = tempdir().unwrap();
        write(dir.path(), &fabric());

        let err = resolve_version_chain(dir.path(), "fabric-loader-0.15.0-1.20.1")
            .await
            .unwrap_err();
        match err.downcast_ref::<DescriptorError>() {
            Some(DescriptorError::MissingParent { parent, .. }) => assert_eq!(parent, "1.20.1"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn cycles_are_detected() {
        let dir = tempdir().unwrap();
        write(dir.path(), &parse(r#"{"id":"a","inheritsFrom":"b"}"#));
        write(dir.path(), &parse(r#"{"id":"b","inheritsFrom":"a"}"#));

        let err = resolve_version_chain(dir.path(), "a").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DescriptorError>(),
            Some(DescriptorError::Cycle(_))
        ));
    }
}
