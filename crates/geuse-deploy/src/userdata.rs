//! Instance initialisation script: rendering, password generation, and the
//! compressed-payload limit.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use geuse_domain::Tier;
use rand::Rng;

use crate::error::DeployError;

/// Provider-side limit on user data after gzip.
pub const USER_DATA_LIMIT_BYTES: usize = 16_384;

const PASSWORD_LENGTH: usize = 32;
const PASSWORD_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";

#[derive(Debug, Clone)]
pub struct UserDataSpec {
    pub efs_id: String,
    pub efs_dns: String,
    pub efs_mount_target_ip: Option<String>,
    pub tier: Tier,
    pub stack_name: String,
    pub region: String,
    pub postgres_password: String,
    pub use_runtime_bundle: bool,
    pub runtime_bundle_path: Option<String>,
}

pub fn generate_postgres_password() -> String {
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..PASSWORD_ALPHABET.len());
            PASSWORD_ALPHABET[idx] as char
        })
        .collect()
}

/// Render the initialisation script. The filesystem is mounted by DNS with an
/// IP fallback (DNS resolution lags mount-target creation), then the service
/// stack is brought up under compose.
pub fn generate_script(spec: &UserDataSpec) -> String {
    let mount_fallback = match &spec.efs_mount_target_ip {
        Some(ip) => format!(
            r#"  echo "EFS DNS mount failed; falling back to mount target IP"
  mount -t nfs4 -o nfsvers=4.1,rsize=1048576,wsize=1048576,hard,timeo=600,retrans=2 \
    {ip}:/ /mnt/efs"#
        ),
        None => r#"  echo "EFS DNS mount failed and no mount target IP recorded" >&2
  exit 1"#
            .to_string(),
    };
    let runtime_bundle = if spec.use_runtime_bundle {
        let bundle = spec
            .runtime_bundle_path
            .as_deref()
            .unwrap_or("/opt/geusemaker/runtime-bundle.tar.gz");
        format!(
            r#"
# Runtime bundle baked into the image or shipped alongside user data.
if [ -f "{bundle}" ]; then
  tar -xzf "{bundle}" -C /opt/geusemaker
fi"#
        )
    } else {
        String::new()
    };

    format!(
        r#"#!/bin/bash
set -euo pipefail

# GeuseMaker instance bootstrap: {stack} ({tier}, {region})

exec > >(tee -a /var/log/geusemaker-init.log) 2>&1
echo "bootstrap started at $(date -u +%Y-%m-%dT%H:%M:%SZ)"

if ! command -v docker >/dev/null 2>&1; then
  if command -v dnf >/dev/null 2>&1; then
    dnf install -y docker nfs-utils
  else
    apt-get update -y
    apt-get install -y docker.io docker-compose-plugin nfs-common
  fi
fi
systemctl enable --now docker

mkdir -p /mnt/efs
if ! mount -t nfs4 -o nfsvers=4.1,rsize=1048576,wsize=1048576,hard,timeo=600,retrans=2 \
  {efs_dns}:/ /mnt/efs; then
{mount_fallback}
fi
echo "{efs_dns}:/ /mnt/efs nfs4 nfsvers=4.1,rsize=1048576,wsize=1048576,hard,timeo=600,retrans=2,_netdev 0 0" >> /etc/fstab

mkdir -p /opt/geusemaker /mnt/efs/{{n8n,postgres,qdrant,ollama}}
cat > /opt/geusemaker/.env <<ENV
GEUSE_STACK={stack}
GEUSE_TIER={tier}
GEUSE_REGION={region}
EFS_ID={efs_id}
POSTGRES_PASSWORD={password}
ENV
chmod 600 /opt/geusemaker/.env
{runtime_bundle}

cd /opt/geusemaker
if [ -f docker-compose.yml ]; then
  docker compose up -d || docker-compose up -d
fi

echo "bootstrap finished at $(date -u +%Y-%m-%dT%H:%M:%SZ)"
"#,
        stack = spec.stack_name,
        tier = spec.tier,
        region = spec.region,
        efs_dns = spec.efs_dns,
        efs_id = spec.efs_id,
        password = spec.postgres_password,
        mount_fallback = mount_fallback,
        runtime_bundle = runtime_bundle,
    )
}

/// Gzip-compress the script; the provider base64-encodes on the wire so only
/// the compressed size counts against the limit.
pub fn compress(script: &str) -> Result<Vec<u8>, DeployError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(script.as_bytes())
        .and_then(|_| encoder.finish())
        .map_err(|e| DeployError::RemoteCommandFailed(format!("gzip failed: {e}")))
        .and_then(|payload| {
            enforce_limit(payload.len())?;
            Ok(payload)
        })
}

pub fn enforce_limit(size: usize) -> Result<(), DeployError> {
    if size > USER_DATA_LIMIT_BYTES {
        return Err(DeployError::UserDataTooLarge {
            size,
            limit: USER_DATA_LIMIT_BYTES,
        });
    }
    Ok(())
}
