//! Material records, the material library and Mohr-Coulomb plasticity.
//!
//! Stresses are tension positive, in Voigt order `[σx, σy, τxy]` with
//! engineering shear strain `[εx, εy, γxy]`.

use std::collections::BTreeMap;

use nalgebra::{matrix, Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{FaultlineError, Result};

/// Yield index reported when the shear capacity vanishes (beyond the
/// Mohr-Coulomb apex) or when a zero tensile strength is exceeded.
pub const YIELD_INDEX_CAP: f64 = 10.0;

/// Calculates the plane-strain stress-strain matrix
///
/// # Arguments
/// * `poisson_ratio` - The poisson ratio of the material
/// * `youngs_modulus` - The modulus of elasticity of the material
///
/// # Returns
/// A 3x3 stress-strain matrix
pub fn compute_stress_strain_matrix(poisson_ratio: f64, youngs_modulus: f64) -> Matrix3<f64> {
    let nu = poisson_ratio;
    let mut stress_strain_mat: Matrix3<f64> = matrix![
        1.0 - nu, nu, 0.0;
        nu, 1.0 - nu, 0.0;
        0.0, 0.0, (1.0 - 2.0 * nu) / 2.0;
    ];

    stress_strain_mat *= youngs_modulus / ((1.0 + nu) * (1.0 - 2.0 * nu));

    stress_strain_mat
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrincipalStresses {
    pub sigma1: f64,
    pub sigma3: f64,
    /// Direction of σ1 measured counter-clockwise from +x, radians
    pub angle: f64,
}

/// In-plane principal stresses of `[σx, σy, τxy]`, σ1 ≥ σ3
pub fn principal_stresses(stress: &Vector3<f64>) -> PrincipalStresses {
    let (sx, sy, txy) = (stress[0], stress[1], stress[2]);
    let center = 0.5 * (sx + sy);
    let radius = f64::sqrt(f64::powi(0.5 * (sx - sy), 2) + txy * txy);
    PrincipalStresses {
        sigma1: center + radius,
        sigma3: center - radius,
        angle: 0.5 * f64::atan2(2.0 * txy, sx - sy),
    }
}

/// Rebuilds `[σx, σy, τxy]` from principal values and the σ1 direction
pub fn stress_from_principal(sigma1: f64, sigma3: f64, angle: f64) -> Vector3<f64> {
    let center = 0.5 * (sigma1 + sigma3);
    let radius = 0.5 * (sigma1 - sigma3);
    let (s2, c2) = f64::sin_cos(2.0 * angle);
    Vector3::new(center + radius * c2, center - radius * c2, radius * s2)
}

/// Scalar measure of a plastic strain increment
pub fn equivalent_plastic_strain(plastic_strain: &Vector3<f64>) -> f64 {
    f64::sqrt(
        plastic_strain[0] * plastic_strain[0]
            + plastic_strain[1] * plastic_strain[1]
            + 0.5 * plastic_strain[2] * plastic_strain[2],
    )
}

/// Outcome of a stress return.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlasticCorrection {
    pub stress: Vector3<f64>,
    pub plastic_strain_increment: Vector3<f64>,
    pub yielded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub id: usize,
    pub name: String,
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
    pub density: f64,
    pub cohesion: f64,
    /// Friction angle, degrees
    pub friction_angle: f64,
    pub tensile_strength: f64,
    /// Slope of cohesion versus equivalent plastic strain. Negative softens.
    pub hardening_modulus: f64,
    pub residual_cohesion: f64,
    pub plastic: bool,
}

impl Material {
    /// Creates an isotropic linear elastic material
    ///
    /// # Arguments
    /// * `id` - The key of this material in the library
    /// * `youngs_modulus` - Young's modulus, must be positive
    /// * `poisson_ratio` - Must lie in (-1, 0.5)
    pub fn elastic(id: usize, youngs_modulus: f64, poisson_ratio: f64) -> Result<Material> {
        if youngs_modulus <= 0.0 {
            return Err(FaultlineError::Material(format!(
                "Material {id} has non-positive Young's modulus {youngs_modulus}"
            )));
        }
        if poisson_ratio <= -1.0 || poisson_ratio >= 0.5 {
            return Err(FaultlineError::Material(format!(
                "Material {id} has Poisson's ratio {poisson_ratio} outside (-1, 0.5)"
            )));
        }
        Ok(Material {
            id,
            name: format!("material-{id}"),
            youngs_modulus,
            poisson_ratio,
            density: 0.0,
            cohesion: f64::MAX,
            friction_angle: 0.0,
            tensile_strength: f64::MAX,
            hardening_modulus: 0.0,
            residual_cohesion: 0.0,
            plastic: false,
        })
    }

    pub fn with_name(mut self, name: &str) -> Material {
        self.name = name.to_owned();
        self
    }

    pub fn with_density(mut self, density: f64) -> Material {
        self.density = density;
        self
    }

    /// Sets Mohr-Coulomb strength parameters and enables plasticity
    pub fn with_strength(
        mut self,
        cohesion: f64,
        friction_angle: f64,
        tensile_strength: f64,
    ) -> Result<Material> {
        if cohesion < 0.0 || tensile_strength < 0.0 {
            return Err(FaultlineError::Material(format!(
                "Material {} has negative cohesion or tensile strength",
                self.id
            )));
        }
        if !(0.0..90.0).contains(&friction_angle) {
            return Err(FaultlineError::Material(format!(
                "Material {} has friction angle {friction_angle} outside [0, 90)",
                self.id
            )));
        }
        self.cohesion = cohesion;
        self.friction_angle = friction_angle;
        self.tensile_strength = tensile_strength;
        self.residual_cohesion = self.residual_cohesion.min(cohesion);
        self.plastic = true;
        Ok(self)
    }

    pub fn with_softening(mut self, hardening_modulus: f64, residual_cohesion: f64) -> Material {
        self.hardening_modulus = hardening_modulus;
        self.residual_cohesion = residual_cohesion;
        self
    }

    /// Plane-strain elasticity matrix D
    pub fn elasticity_matrix(&self) -> Matrix3<f64> {
        compute_stress_strain_matrix(self.poisson_ratio, self.youngs_modulus)
    }

    pub fn friction_angle_rad(&self) -> f64 {
        self.friction_angle.to_radians()
    }

    /// Cohesion after `kappa` equivalent plastic strain has accumulated
    pub fn current_cohesion(&self, kappa: f64) -> f64 {
        let c = self.cohesion + self.hardening_modulus * kappa;
        if self.hardening_modulus < 0.0 {
            c.max(self.residual_cohesion)
        } else {
            c
        }
    }

    /// Fraction of lost cohesion, 0 for intact material
    pub fn damage(&self, kappa: f64) -> f64 {
        if !self.plastic || self.cohesion <= 0.0 || self.cohesion == f64::MAX {
            return 0.0;
        }
        (1.0 - self.current_cohesion(kappa) / self.cohesion).clamp(0.0, 1.0)
    }

    /// Ratio of mobilised to available strength: shear stress over
    /// Mohr-Coulomb capacity, or σ1 over the tensile strength, whichever is
    /// larger. 1 marks the yield surface.
    pub fn yield_index(&self, stress: &Vector3<f64>, kappa: f64) -> f64 {
        if !self.plastic {
            return 0.0;
        }
        let p = principal_stresses(stress);
        let phi = self.friction_angle_rad();
        let c = self.current_cohesion(kappa);

        let mean = 0.5 * (p.sigma1 + p.sigma3);
        let radius = 0.5 * (p.sigma1 - p.sigma3);
        let capacity = c * phi.cos() - mean * phi.sin();

        let shear_index = if capacity > f64::EPSILON {
            radius / capacity
        } else if radius > 0.0 || mean > 0.0 {
            YIELD_INDEX_CAP
        } else {
            0.0
        };

        let tensile_index = if self.tensile_strength > f64::EPSILON {
            p.sigma1 / self.tensile_strength
        } else if p.sigma1 > 0.0 {
            YIELD_INDEX_CAP
        } else {
            0.0
        };

        shear_index.max(tensile_index).clamp(0.0, YIELD_INDEX_CAP)
    }

    /// Returns a trial stress onto the Mohr-Coulomb surface with tension
    /// cut-off. Shear return keeps the mean in-plane stress (non-dilatant);
    /// the principal directions are preserved.
    ///
    /// # Returns
    /// `None` for purely elastic materials
    pub fn return_map(&self, trial: &Vector3<f64>, kappa: f64) -> Option<PlasticCorrection> {
        if !self.plastic {
            return None;
        }

        let p = principal_stresses(trial);
        let phi = self.friction_angle_rad();
        let c = self.current_cohesion(kappa);

        let mut mean = 0.5 * (p.sigma1 + p.sigma3);
        let mut radius = 0.5 * (p.sigma1 - p.sigma3);
        let capacity = c * phi.cos() - mean * phi.sin();
        let mut yielded = false;

        if radius > capacity {
            yielded = true;
            if capacity > 0.0 {
                radius = capacity;
            } else {
                // apex of the cone
                radius = 0.0;
                if phi > 0.0 {
                    mean = c / phi.tan();
                }
            }
        }

        let mut sigma1 = mean + radius;
        let mut sigma3 = mean - radius;

        if self.tensile_strength < f64::MAX && sigma1 > self.tensile_strength {
            yielded = true;
            sigma1 = self.tensile_strength;
            sigma3 = sigma3.min(self.tensile_strength);
        }

        if !yielded {
            return Some(PlasticCorrection {
                stress: *trial,
                plastic_strain_increment: Vector3::zeros(),
                yielded: false,
            });
        }

        let stress = stress_from_principal(sigma1, sigma3, p.angle);
        let compliance = self
            .elasticity_matrix()
            .try_inverse()
            .unwrap_or_else(Matrix3::zeros);

        Some(PlasticCorrection {
            stress,
            plastic_strain_increment: compliance * (trial - stress),
            yielded: true,
        })
    }
}

/// Materials keyed by id. Elements only store the id.
#[derive(Debug, Clone, Default)]
pub struct MaterialLibrary {
    materials: BTreeMap<usize, Material>,
}

impl MaterialLibrary {
    pub fn new() -> MaterialLibrary {
        MaterialLibrary::default()
    }

    /// Inserts or replaces a material, returning the previous record
    pub fn insert(&mut self, material: Material) -> Option<Material> {
        self.materials.insert(material.id, material)
    }

    pub fn get(&self, id: usize) -> Result<&Material> {
        self.materials
            .get(&id)
            .ok_or_else(|| FaultlineError::Material(format!("No material with id {id}")))
    }

    pub fn contains(&self, id: usize) -> bool {
        self.materials.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Material> {
        self.materials.values()
    }
}
