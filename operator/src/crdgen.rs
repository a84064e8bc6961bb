use kube::CustomResourceExt;

use vegeta_operator::attack::Attack;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&Attack::crd())?);
    Ok(())
}
