pub mod postdeploy;
pub mod predeploy;

pub use postdeploy::PostDeploymentValidator;
pub use predeploy::PreDeploymentValidator;
