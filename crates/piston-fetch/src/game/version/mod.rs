pub mod descriptor;
pub mod merge;

pub use descriptor::{
    Argument, ArgumentValue, Artifact, AssetIndex, AssetIndexRef, AssetObject, DownloadInfo,
    LaunchArguments, Library, OsRule, Rule, RuleAction, VersionDescriptor, VersionManifest,
    VersionManifestEntry,
};
pub use merge::{merge, resolve_version_chain, DescriptorError, ResolvedVersion};
