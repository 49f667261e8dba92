//! Material properties for physics simulation.

use crate::fph;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// The material of a shape, determining its mass and how it responds to
/// contact with other shapes.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    /// Mass per unit area.
    pub density: fph,
    /// Response parameters for contacts involving the shape.
    pub contact_response: ContactResponseParameters,
}

/// Parameters quantifying the physical response of a body in contact with
/// another body.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactResponseParameters {
    /// The elasticity of collisions with the body, typically between 0 (fully
    /// inelastic, the bodies stay together) and 1 (elastic, the bodies bounce
    /// maximally apart).
    pub restitution_coef: fph,
    /// The strength of friction at the contact.
    pub friction_coef: fph,
}

impl Material {
    pub fn new(density: fph, restitution_coef: fph, friction_coef: fph) -> Self {
        Self {
            density,
            contact_response: ContactResponseParameters::new(restitution_coef, friction_coef),
        }
    }

    /// A material with the given density and the default contact response.
    pub fn with_density(density: fph) -> Self {
        Self {
            density,
            ..Default::default()
        }
    }

    /// # Errors
    /// Returns an error if the density is not positive or any of the contact
    /// response parameters are out of range.
    pub fn validate(&self) -> Result<()> {
        if !(self.density.is_finite() && self.density > 0.0) {
            bail!("Invalid material density: {}", self.density);
        }
        self.contact_response.validate()
    }
}

impl Default for Material {
    fn default() -> Self {
        Self {
            density: 1.0,
            contact_response: ContactResponseParameters::default(),
        }
    }
}

impl ContactResponseParameters {
    pub fn new(restitution_coef: fph, friction_coef: fph) -> Self {
        Self {
            restitution_coef,
            friction_coef,
        }
    }

    /// Computes the effective response parameters to use when resolving a
    /// contact between two bodies, given the reponse parameters of each of
    /// them (the physical response depends on the material properties of both
    /// bodies).
    pub fn combined(&self, other: &Self) -> Self {
        Self {
            restitution_coef: fph::max(self.restitution_coef, other.restitution_coef),
            friction_coef: fph::sqrt(self.friction_coef * other.friction_coef),
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.restitution_coef) {
            bail!("Invalid restitution coefficient: {}", self.restitution_coef);
        }
        if !(self.friction_coef.is_finite() && self.friction_coef >= 0.0) {
            bail!("Invalid friction coefficient: {}", self.friction_coef);
        }
        Ok(())
    }
}

impl Default for ContactResponseParameters {
    fn default() -> Self {
        Self {
            restitution_coef: 0.0,
            friction_coef: 0.7,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn combined_response_uses_max_restitution_and_mean_friction() {
        let a = ContactResponseParameters::new(0.2, 0.25);
        let b = ContactResponseParameters::new(0.8, 1.0);
        let combined = a.combined(&b);
        assert_abs_diff_eq!(combined.restitution_coef, 0.8);
        assert_abs_diff_eq!(combined.friction_coef, 0.5);
    }

    #[test]
    fn invalid_materials_are_rejected() {
        assert!(Material::with_density(0.0).validate().is_err());
        assert!(Material::new(1.0, 1.5, 0.5).validate().is_err());
        assert!(Material::new(1.0, 0.5, -0.1).validate().is_err());
        assert!(Material::default().validate().is_ok());
    }
}
